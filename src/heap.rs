// This Source Code Form is subject to the terms of the Mozilla Public
// License, v2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A minimal managed heap of immutable strings.
//!
//! This is the collaborator the intern table is tested and benchmarked
//! against: it hands out [`StringRef`]s, keeps a registry of every live
//! object with a mark bit, and frees whatever is left unmarked after a
//! collection (see [`crate::collector`]). Objects allocated into the image
//! space are immortal.

use dashmap::DashMap;
use thiserror::Error;

use std::fmt;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::mutf8::{self, DecodeError};
use crate::{ManagedString, StringAllocator};

//----------------------------------------------------------------------------
// Public API - AllocError

/// Failure to allocate a string from encoded text.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("malformed modified UTF-8: {0}")]
    Decode(#[from] DecodeError),
    #[error("expected {expected} UTF-16 code units but decoded {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

//----------------------------------------------------------------------------
// Public API - Space

/// Where an object lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Space {
    /// Loaded from the boot image. Never freed.
    Image,
    /// Allocated at runtime. Freed when unmarked at the end of a collection.
    Regular,
}

//----------------------------------------------------------------------------
// Public API - StringRef type definition

/// A reference to an immutable string object on a [`Heap`].
///
/// Cloning a `StringRef` copies the reference, not the string. Two
/// references are the same object iff [`ManagedString::same_object`] holds;
/// content comparison goes through [`ManagedString::content_equals`].
#[derive(Clone)]
pub struct StringRef {
    object: Arc<StringObject>,
}

struct StringObject {
    id: u64,
    space: Space,
    /// Precomputed when the object is allocated.
    hash: u32,
    chars: Box<[u16]>,
    marked: AtomicBool,
}

//------------------------------------------------------------------
// Trait implementations

impl ManagedString for StringRef {
    #[inline]
    fn content_hash(&self) -> u32 {
        self.object.hash
    }

    fn content_equals(&self, other: &StringRef) -> bool {
        self.same_object(other)
            || (self.object.hash == other.object.hash && self.object.chars == other.object.chars)
    }

    #[inline]
    fn same_object(&self, other: &StringRef) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }
}

impl fmt::Debug for StringRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringRef")
            .field("id", &self.object.id)
            .field("space", &self.object.space)
            .field("value", &self.to_string_lossy())
            .finish()
    }
}

impl fmt::Display for StringRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

//------------------------------------------------------------------
// Construction API

impl StringRef {
    fn new(id: u64, space: Space, chars: Box<[u16]>) -> StringRef {
        StringRef {
            object: Arc::new(StringObject {
                id,
                space,
                hash: hash_code(&chars),
                chars,
                marked: AtomicBool::new(false),
            }),
        }
    }
}

//------------------------------------------------------------------
// Query API

impl StringRef {
    /// Heap-unique object id.
    pub fn id(&self) -> u64 {
        self.object.id
    }

    pub fn space(&self) -> Space {
        self.object.space
    }

    /// The UTF-16 code units of the string.
    pub fn chars(&self) -> &[u16] {
        &self.object.chars
    }

    /// Length in UTF-16 code units.
    pub fn len(&self) -> usize {
        self.object.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object.chars.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.object.chars)
    }

    pub fn to_modified_utf8(&self) -> Vec<u8> {
        mutf8::encode(&self.object.chars)
    }

    pub fn is_marked(&self) -> bool {
        self.object.marked.load(Ordering::Acquire)
    }
}

//------------------------------------------------------------------
// Modification API

impl StringRef {
    /// Set the mark bit, returning true if it was previously clear.
    pub fn mark(&self) -> bool {
        !self.object.marked.swap(true, Ordering::AcqRel)
    }

    fn clear_mark(&self) {
        self.object.marked.store(false, Ordering::Release);
    }
}

/// The content hash of a string: `s[0]*31^(n-1) + ... + s[n-1]`, wrapping.
fn hash_code(chars: &[u16]) -> u32 {
    chars
        .iter()
        .fold(0u32, |h, &c| h.wrapping_mul(31).wrapping_add(c as u32))
}

//----------------------------------------------------------------------------
// Public API - Heap type definition

/// A thread-safe registry of string objects.
///
/// Any number of threads may allocate concurrently. Marking and sweeping
/// assume the world is stopped.
pub struct Heap<RS: Send + Sync + Clone + BuildHasher> {
    objects: DashMap<u64, StringRef, RS>,
    next_id: AtomicU64,
}

//------------------------------------------------------------------
// Trait implementations

impl<RS: Send + Sync + Clone + BuildHasher> fmt::Debug for Heap<RS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("objects", &self.objects.len())
            .finish()
    }
}

impl<RS: Send + Sync + Clone + BuildHasher> StringAllocator for Heap<RS> {
    type String = StringRef;
    type Error = AllocError;

    fn allocate_string_from_encoded_bytes(&self, bytes: &[u8]) -> Result<StringRef, AllocError> {
        self.alloc_from_modified_utf8(bytes)
    }

    fn allocate_string_from_encoded_bytes_with_len(
        &self,
        utf16_length: usize,
        bytes: &[u8],
    ) -> Result<StringRef, AllocError> {
        self.alloc_from_modified_utf8_with_len(utf16_length, bytes)
    }
}

//------------------------------------------------------------------
// Construction API

impl<RS: Send + Sync + Clone + BuildHasher> Heap<RS> {
    pub fn new(random_state: RS) -> Heap<RS> {
        Heap {
            objects: DashMap::with_capacity_and_hasher(64, random_state),
            next_id: AtomicU64::new(0),
        }
    }
}

//------------------------------------------------------------------
// Allocation API

impl<RS: Send + Sync + Clone + BuildHasher> Heap<RS> {
    pub fn alloc_str(&self, s: &str) -> StringRef {
        self.alloc_utf16(s.encode_utf16().collect())
    }

    pub fn alloc_utf16(&self, chars: Vec<u16>) -> StringRef {
        self.alloc_in(Space::Regular, chars.into_boxed_slice())
    }

    /// Allocate a string from modified UTF-8 text.
    pub fn alloc_from_modified_utf8(&self, bytes: &[u8]) -> Result<StringRef, AllocError> {
        let chars = mutf8::decode(bytes)?;
        Ok(self.alloc_utf16(chars))
    }

    /// Like [`Heap::alloc_from_modified_utf8`], but also checks that the
    /// text decodes to exactly `utf16_length` code units.
    pub fn alloc_from_modified_utf8_with_len(
        &self,
        utf16_length: usize,
        bytes: &[u8],
    ) -> Result<StringRef, AllocError> {
        let chars = mutf8::decode(bytes)?;
        if chars.len() != utf16_length {
            return Err(AllocError::LengthMismatch {
                expected: utf16_length,
                actual: chars.len(),
            });
        }
        Ok(self.alloc_utf16(chars))
    }

    /// Allocate an immortal string, as if it had been loaded from the boot image.
    pub fn alloc_image_str(&self, s: &str) -> StringRef {
        self.alloc_in(Space::Image, s.encode_utf16().collect())
    }

    fn alloc_in(&self, space: Space, chars: Box<[u16]>) -> StringRef {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let s = StringRef::new(id, space, chars);
        self.objects.insert(id, s.clone());
        s
    }
}

//------------------------------------------------------------------
// Query API

impl<RS: Send + Sync + Clone + BuildHasher> Heap<RS> {
    /// Number of objects currently on the heap, image objects included.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Whether `s` is still allocated on this heap.
    pub fn contains(&self, s: &StringRef) -> bool {
        self.objects
            .get(&s.id())
            .map_or(false, |entry| entry.value().same_object(s))
    }
}

//------------------------------------------------------------------
// Collection API

impl<RS: Send + Sync + Clone + BuildHasher> Heap<RS> {
    /// Clear the mark bit of every object.
    ///
    /// The world must be stopped: an object allocated concurrently may be
    /// missed.
    pub fn clear_marks(&self) {
        for entry in self.objects.iter() {
            entry.value().clear_mark();
        }
    }

    /// Free every regular object that is not marked.
    ///
    /// Returns the number of objects freed. The world must be stopped: an
    /// object allocated after [`Heap::clear_marks`] is unmarked and would be
    /// freed while still in use.
    pub fn sweep(&self) -> usize {
        let mut freed = 0;
        self.objects.retain(|_, s| {
            let keep = s.space() == Space::Image || s.is_marked();
            if !keep {
                freed += 1;
            }
            keep
        });
        freed
    }
}
