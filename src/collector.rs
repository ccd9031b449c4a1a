// This Source Code Form is subject to the terms of the Mozilla Public
// License, v2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A stop-the-world mark/sweep cycle over a [`Heap`] and an [`InternTable`].
//!
//! Strings hold no references to other objects, so marking is a single
//! pass over the roots.

use tracing::debug;

use std::hash::BuildHasher;

use crate::heap::{Heap, StringRef};
use crate::InternTable;

/// What one collection did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectionStats {
    /// Objects marked from the explicit roots and the strong interns.
    pub marked: usize,
    /// Weak interns dropped because their string was unmarked.
    pub weak_interns_swept: usize,
    /// Objects freed from the heap.
    pub objects_freed: usize,
}

/// Run one full collection.
///
/// `roots` are the references held by the mutators (stacks, globals and so
/// on). Image objects are never freed. The caller must make sure no
/// mutator runs until this returns.
pub fn collect_garbage<HRS, TRS>(
    heap: &Heap<HRS>,
    interns: &InternTable<StringRef, TRS>,
    roots: &[StringRef],
) -> CollectionStats
where
    HRS: Send + Sync + Clone + BuildHasher,
    TRS: Send + Sync + Clone + BuildHasher,
{
    heap.clear_marks();

    let mut marked = 0;
    let mut mark = |s: &StringRef| {
        if s.mark() {
            marked += 1;
        }
    };
    roots.iter().for_each(&mut mark);
    interns.visit_roots(&mut mark);

    let weak_interns_swept = interns.sweep_weak(|s| s.is_marked());
    let objects_freed = heap.sweep();

    let stats = CollectionStats {
        marked,
        weak_interns_swept,
        objects_freed,
    };
    debug!(
        marked,
        weak_interns_swept,
        objects_freed,
        live = heap.len(),
        "collection finished"
    );
    stats
}
