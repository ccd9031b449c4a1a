//! A canonicalizing string table for a garbage-collected runtime.
//!
//! [`InternTable`] guarantees that at most one canonical instance is handed
//! out per distinct string content, and tells the collector which of those
//! instances it keeps alive. Entries live in one of three tiers:
//!
//! - strong: GC roots, reported by [`InternTable::visit_roots`].
//! - weak: not roots; dropped by [`InternTable::sweep_weak`] once the
//!   collector finds the string unreachable.
//! - image strong: registered once at bootstrap from the boot image; kept
//!   alive by the image itself, so neither visited nor swept.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use parking_lot::Mutex;
use tracing::{debug, trace};

use std::fmt;
use std::hash::BuildHasher;
use std::io;

pub mod collector;
pub mod heap;
pub mod mutf8;
mod reference_table;

use reference_table::ReferenceTable;

//----------------------------------------------------------------------------
// Public API - collaborator traits

/// A reference to an immutable string owned by the managed heap.
///
/// The table never owns strings, it only stores references, so `clone`
/// is expected to copy the reference rather than the content.
pub trait ManagedString: Clone {
    /// Content hash. Must be stable for the lifetime of the object and
    /// equal for content-equal strings.
    fn content_hash(&self) -> u32;

    /// Full content comparison.
    fn content_equals(&self, other: &Self) -> bool;

    /// Identity comparison: both references point at the same object.
    fn same_object(&self, other: &Self) -> bool;
}

/// The part of the managed heap the table needs to intern raw text.
pub trait StringAllocator {
    type String: ManagedString;
    type Error;

    fn allocate_string_from_encoded_bytes(&self, bytes: &[u8])
        -> Result<Self::String, Self::Error>;

    /// Like `allocate_string_from_encoded_bytes`, failing unless the text
    /// decodes to exactly `utf16_length` code units.
    fn allocate_string_from_encoded_bytes_with_len(
        &self,
        utf16_length: usize,
        bytes: &[u8],
    ) -> Result<Self::String, Self::Error>;
}

//----------------------------------------------------------------------------
// Public API - Strength, InternTableConfig, InternTableStats

/// Which tier a newly interned string goes into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Strength {
    Strong,
    Weak,
}

/// Initial capacities for the mutable tiers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InternTableConfig {
    pub strong_capacity: usize,
    pub weak_capacity: usize,
}

impl Default for InternTableConfig {
    fn default() -> InternTableConfig {
        InternTableConfig {
            strong_capacity: 64,
            weak_capacity: 64,
        }
    }
}

/// Per-tier entry counts, taken under a single lock acquisition.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct InternTableStats {
    pub strong: usize,
    pub weak: usize,
    pub image_strong: usize,
}

impl fmt::Display for InternTableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Intern table: {} strong; {} weak; {} image strong",
            self.strong, self.weak, self.image_strong
        )
    }
}

//----------------------------------------------------------------------------
// Public API - InternTable type definition
//
// NOTE: [lock-discipline]
//
// All three tiers sit behind one mutex, and every public operation holds it
// for its whole duration. The tier helpers (lookup, insert, remove, promote)
// are methods on `Tiers`, which can only be reached through the mutex guard
// (or through `&mut InternTable`, which proves there is no other user), so
// they cannot be called without the lock.
//
// The callbacks passed to `visit_roots` and `sweep_weak` run with the lock
// held. They must not call back into the same table: that deadlocks.

/// A thread-safe intern table with strong, weak and image tiers.
///
/// The table is constructed once by the runtime and shared by reference
/// with mutator threads and the collector.
///
/// The `RS` generic parameter is the `BuildHasher` for the bucket maps.
/// Keys are already content hashes, so a cheap hasher such as
/// `BuildHasherDefault<rustc_hash::FxHasher>` is a good fit.
pub struct InternTable<S, RS> {
    tiers: Mutex<Tiers<S, RS>>,
}

//------------------------------------------------------------------
// Trait implementations

impl<S: ManagedString, RS: Send + Sync + Clone + BuildHasher> fmt::Debug for InternTable<S, RS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("InternTable")
            .field("strong", &stats.strong)
            .field("weak", &stats.weak)
            .field("image_strong", &stats.image_strong)
            .finish()
    }
}

//------------------------------------------------------------------
// Construction API

impl<S: ManagedString, RS: Send + Sync + Clone + BuildHasher> InternTable<S, RS> {
    /// Create an empty table with default capacities.
    ///
    /// If you're not sure what `random_state` to plug in,
    /// [`Default::default()`] is a reasonable choice.
    pub fn new(random_state: RS) -> InternTable<S, RS> {
        Self::with_config(InternTableConfig::default(), random_state)
    }

    pub fn with_config(config: InternTableConfig, random_state: RS) -> InternTable<S, RS> {
        InternTable {
            tiers: Mutex::new(Tiers {
                strong: ReferenceTable::with_capacity_and_hasher(
                    config.strong_capacity,
                    random_state.clone(),
                ),
                weak: ReferenceTable::with_capacity_and_hasher(
                    config.weak_capacity,
                    random_state.clone(),
                ),
                image_strong: ReferenceTable::with_capacity_and_hasher(0, random_state),
            }),
        }
    }

    /// Create a table whose image tier holds `image_strings`.
    ///
    /// The strings must be pairwise distinct by content; this is not checked.
    pub fn with_image_strings(
        config: InternTableConfig,
        random_state: RS,
        image_strings: impl IntoIterator<Item = S>,
    ) -> InternTable<S, RS> {
        let mut table = Self::with_config(config, random_state);
        for s in image_strings {
            table.register_strong(s);
        }
        debug!(
            image_strong = table.tiers.get_mut().image_strong.len(),
            "registered boot image interns"
        );
        table
    }

    /// Add a string from the boot image to the image tier.
    ///
    /// No deduplication is performed against any tier. Taking `&mut self`
    /// restricts this to bootstrap, before the table is shared.
    pub fn register_strong(&mut self, s: S) {
        let hash = s.content_hash();
        self.tiers.get_mut().image_strong.insert(s, hash);
    }
}

//------------------------------------------------------------------
// Modification API

impl<S: ManagedString, RS: Send + Sync + Clone + BuildHasher> InternTable<S, RS> {
    /// Return the canonical instance for the content of `s`.
    ///
    /// Existing strong and image entries always win, whatever `strength`
    /// is: a weak request never demotes or duplicates them, and the
    /// caller's new instance is dropped. A strong request matching a weak
    /// entry promotes that same entry to the strong tier. Otherwise `s`
    /// itself becomes canonical in the requested tier.
    pub fn intern(&self, s: S, strength: Strength) -> S {
        self.tiers.lock().intern(s, strength)
    }

    pub fn intern_strong(&self, s: S) -> S {
        self.intern(s, Strength::Strong)
    }

    pub fn intern_weak(&self, s: S) -> S {
        self.intern(s, Strength::Weak)
    }

    /// Like [`InternTable::intern`], passing an absent string through
    /// untouched.
    pub fn intern_opt(&self, s: Option<S>, strength: Strength) -> Option<S> {
        s.map(|s| self.intern(s, strength))
    }

    /// Allocate a string from encoded text and intern it strongly.
    pub fn intern_strong_encoded<A>(&self, allocator: &A, bytes: &[u8]) -> Result<S, A::Error>
    where
        A: StringAllocator<String = S>,
    {
        let s = allocator.allocate_string_from_encoded_bytes(bytes)?;
        Ok(self.intern_strong(s))
    }

    /// Like [`InternTable::intern_strong_encoded`], with the expected
    /// length of the string in UTF-16 code units. Nothing is interned if
    /// the length does not match.
    pub fn intern_strong_encoded_with_len<A>(
        &self,
        allocator: &A,
        utf16_length: usize,
        bytes: &[u8],
    ) -> Result<S, A::Error>
    where
        A: StringAllocator<String = S>,
    {
        let s = allocator.allocate_string_from_encoded_bytes_with_len(utf16_length, bytes)?;
        Ok(self.intern_strong(s))
    }
}

//------------------------------------------------------------------
// Query API

impl<S: ManagedString, RS: Send + Sync + Clone + BuildHasher> InternTable<S, RS> {
    /// Whether the weak tier holds `s` itself (not merely equal content).
    pub fn contains_weak(&self, s: &S) -> bool {
        let tiers = self.tiers.lock();
        tiers
            .weak
            .lookup(s, s.content_hash())
            .map_or(false, |found| found.same_object(s))
    }

    /// Find the strong or image entry for the content of `s`, without
    /// inserting anything.
    pub fn lookup_strong(&self, s: &S) -> Option<S> {
        let tiers = self.tiers.lock();
        tiers.lookup_strong(s, s.content_hash()).cloned()
    }

    /// Number of strong and weak entries. Image entries are not counted.
    pub fn size(&self) -> usize {
        let tiers = self.tiers.lock();
        tiers.strong.len() + tiers.weak.len()
    }

    pub fn stats(&self) -> InternTableStats {
        let tiers = self.tiers.lock();
        InternTableStats {
            strong: tiers.strong.len(),
            weak: tiers.weak.len(),
            image_strong: tiers.image_strong.len(),
        }
    }

    /// Write a one-line summary of the tier sizes.
    ///
    /// The lock-protected part is the snapshot of all three counts, taken
    /// in one acquisition by [`InternTable::stats`]. The line is written to
    /// `out` after the lock is released, so a slow sink never blocks
    /// mutators; the counts written are still a consistent snapshot.
    pub fn dump_for_sigquit<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let stats = self.stats();
        writeln!(out, "{}", stats)
    }
}

//------------------------------------------------------------------
// Collector API

impl<S: ManagedString, RS: Send + Sync + Clone + BuildHasher> InternTable<S, RS> {
    /// Call `visit` once for every strong entry.
    ///
    /// Weak entries are not roots, and image entries are kept alive by the
    /// boot image, so neither is visited. `visit` runs with the table lock
    /// held and must not use this table.
    pub fn visit_roots(&self, mut visit: impl FnMut(&S)) {
        let tiers = self.tiers.lock();
        for s in tiers.strong.iter() {
            visit(s);
        }
    }

    /// Drop every weak entry for which `is_marked` returns false.
    ///
    /// Must be called after marking has finished. Returns the number of
    /// entries removed. `is_marked` runs with the table lock held and must
    /// not use this table.
    pub fn sweep_weak(&self, is_marked: impl FnMut(&S) -> bool) -> usize {
        let mut tiers = self.tiers.lock();
        let swept = tiers.weak.retain(is_marked);
        debug!(swept, remaining = tiers.weak.len(), "swept weak interns");
        swept
    }
}

//----------------------------------------------------------------------------
// Internal API - Tiers
//
// See [NOTE: lock-discipline].

struct Tiers<S, RS> {
    strong: ReferenceTable<S, RS>,
    weak: ReferenceTable<S, RS>,
    image_strong: ReferenceTable<S, RS>,
}

impl<S: ManagedString, RS: BuildHasher> Tiers<S, RS> {
    fn lookup_strong(&self, s: &S, hash: u32) -> Option<&S> {
        self.strong
            .lookup(s, hash)
            .or_else(|| self.image_strong.lookup(s, hash))
    }

    fn intern(&mut self, s: S, strength: Strength) -> S {
        let hash = s.content_hash();
        if let Some(existing) = self.lookup_strong(&s, hash) {
            return existing.clone();
        }
        match strength {
            Strength::Strong => match self.weak.lookup(&s, hash).cloned() {
                Some(weak) => self.promote(weak, hash),
                None => {
                    trace!(hash, "new strong intern");
                    self.strong.insert(s, hash)
                }
            },
            Strength::Weak => match self.weak.lookup(&s, hash).cloned() {
                Some(weak) => weak,
                None => {
                    trace!(hash, "new weak intern");
                    self.weak.insert(s, hash)
                }
            },
        }
    }

    /// Move `weak`, which must be in the weak tier, to the strong tier.
    fn promote(&mut self, weak: S, hash: u32) -> S {
        let removed = self.weak.remove(&weak, hash);
        debug_assert!(removed.is_some(), "promoted string was not in the weak tier");
        debug_assert!(self.weak.lookup(&weak, hash).is_none());
        trace!(hash, "promoted weak intern to strong");
        self.strong.insert(weak, hash)
    }
}
