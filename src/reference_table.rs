// This Source Code Form is subject to the terms of the Mozilla Public
// License, v2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::BuildHasher;

use crate::ManagedString;

//----------------------------------------------------------------------------
// Internal API - ReferenceTable type definition

/// A multimap from content hash to string references.
///
/// Every tier of an [`InternTable`](crate::InternTable) is one of these.
/// Hash collisions land in the same bucket and are told apart by a linear
/// scan. Lookup compares by content, removal compares by identity.
///
/// Invariant: no two entries in one table are content-equal. The table does
/// not check this on insertion; the intern policy does.
pub(crate) struct ReferenceTable<S, RS> {
    buckets: HashMap<u32, Vec<S>, RS>,

    /// Total number of entries across all buckets.
    len: usize,
}

//------------------------------------------------------------------
// Construction API

impl<S: ManagedString, RS: BuildHasher> ReferenceTable<S, RS> {
    pub(crate) fn with_capacity_and_hasher(capacity: usize, random_state: RS) -> Self {
        ReferenceTable {
            buckets: HashMap::with_capacity_and_hasher(capacity, random_state),
            len: 0,
        }
    }
}

//------------------------------------------------------------------
// Query API

impl<S: ManagedString, RS: BuildHasher> ReferenceTable<S, RS> {
    /// Find the entry whose content equals `s`.
    pub(crate) fn lookup(&self, s: &S, hash: u32) -> Option<&S> {
        debug_assert_eq!(s.content_hash(), hash);
        self.buckets
            .get(&hash)?
            .iter()
            .find(|existing| existing.content_equals(s))
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &S> + '_ {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }
}

//------------------------------------------------------------------
// Modification API

impl<S: ManagedString, RS: BuildHasher> ReferenceTable<S, RS> {
    /// Insert `s` without checking for an existing equal entry.
    pub(crate) fn insert(&mut self, s: S, hash: u32) -> S {
        debug_assert_eq!(s.content_hash(), hash);
        self.buckets.entry(hash).or_default().push(s.clone());
        self.len += 1;
        s
    }

    /// Remove the entry which is the same object as `s`, returning it.
    ///
    /// An entry that merely has the same content is left alone.
    pub(crate) fn remove(&mut self, s: &S, hash: u32) -> Option<S> {
        let mut bucket = match self.buckets.entry(hash) {
            Entry::Occupied(o) => o,
            Entry::Vacant(_) => return None,
        };
        let index = bucket
            .get()
            .iter()
            .position(|existing| existing.same_object(s))?;
        let removed = bucket.get_mut().swap_remove(index);
        if bucket.get().is_empty() {
            bucket.remove();
        }
        self.len -= 1;
        Some(removed)
    }

    /// Keep only the entries for which `keep` returns true.
    ///
    /// Returns the number of entries removed.
    pub(crate) fn retain(&mut self, mut keep: impl FnMut(&S) -> bool) -> usize {
        let before = self.len;
        let mut remaining = 0;
        self.buckets.retain(|_, bucket| {
            bucket.retain(|s| keep(s));
            remaining += bucket.len();
            !bucket.is_empty()
        });
        self.len = remaining;
        before - remaining
    }
}

#[cfg(test)]
mod tests {
    use super::ReferenceTable;
    use crate::heap::{Heap, StringRef};
    use crate::ManagedString;

    type Table = ReferenceTable<StringRef, ahash::RandomState>;

    fn table() -> Table {
        ReferenceTable::with_capacity_and_hasher(8, Default::default())
    }

    #[test]
    fn test_lookup_scans_colliding_bucket() {
        let heap = Heap::<ahash::RandomState>::new(Default::default());
        // "Aa" and "BB" share a content hash.
        let aa = heap.alloc_str("Aa");
        let bb = heap.alloc_str("BB");
        assert_eq!(aa.content_hash(), bb.content_hash());

        let mut t = table();
        t.insert(aa.clone(), aa.content_hash());
        t.insert(bb.clone(), bb.content_hash());
        assert_eq!(t.len(), 2);

        let probe = heap.alloc_str("BB");
        let found = t.lookup(&probe, probe.content_hash()).expect("BB is present");
        assert!(found.same_object(&bb));
        assert!(!found.same_object(&probe));

        let missing = heap.alloc_str("C#");
        assert!(t.lookup(&missing, missing.content_hash()).is_none());
    }

    #[test]
    fn test_remove_is_by_identity() {
        let heap = Heap::<ahash::RandomState>::new(Default::default());
        let original = heap.alloc_str("value");
        let lookalike = heap.alloc_str("value");
        let hash = original.content_hash();

        let mut t = table();
        t.insert(original.clone(), hash);
        assert!(t.remove(&lookalike, hash).is_none());
        assert_eq!(t.len(), 1);

        let removed = t.remove(&original, hash).expect("original is present");
        assert!(removed.same_object(&original));
        assert!(t.is_empty());
        assert!(t.remove(&original, hash).is_none());
    }

    #[test]
    fn test_retain_updates_len() {
        let heap = Heap::<ahash::RandomState>::new(Default::default());
        let mut t = table();
        for s in ["Aa", "BB", "x", "y"] {
            let r = heap.alloc_str(s);
            t.insert(r.clone(), r.content_hash());
        }
        let removed = t.retain(|s| s.to_string_lossy() != "BB" && s.to_string_lossy() != "x");
        assert_eq!(removed, 2);
        assert_eq!(t.len(), 2);
        let mut left: Vec<String> = t.iter().map(|s| s.to_string_lossy()).collect();
        left.sort();
        assert_eq!(left, vec!["Aa".to_string(), "y".to_string()]);
    }
}
