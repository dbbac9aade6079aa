//! Tombstone sets and the masked-documents registry.
//!
//! A segment that updates or deletes documents of older generations carries a
//! tombstone set naming the masked doc IDs. During execution and merge, each
//! source is tested against the stack of tombstone sets contributed by all
//! strictly newer sources.

use std::sync::Arc;

use crate::DocId;

/// Sorted set of document IDs masked by a newer generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TombstoneSet {
    docs: Vec<DocId>,
}

impl TombstoneSet {
    /// Build from an arbitrary list of doc IDs; sorts and dedups.
    pub fn new(mut docs: Vec<DocId>) -> Self {
        docs.sort_unstable();
        docs.dedup();
        Self { docs }
    }

    pub fn contains(&self, doc: DocId) -> bool {
        self.docs.binary_search(&doc).is_ok()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = DocId> + '_ {
        self.docs.iter().copied()
    }
}

impl FromIterator<DocId> for TombstoneSet {
    fn from_iter<I: IntoIterator<Item = DocId>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Membership view over a stack of tombstone sets.
///
/// `test(doc)` is true iff any set in the stack contains `doc`. The registry
/// shares the sets (it never copies or resizes them) and lives for one
/// execution or for one decoder's lifetime inside a merge.
#[derive(Debug, Clone, Default)]
pub struct MaskedDocsRegistry {
    sets: Vec<Arc<TombstoneSet>>,
}

impl MaskedDocsRegistry {
    /// Build over the given sets. Empty sets are dropped up front so that
    /// `is_empty` can short-circuit the hot paths.
    pub fn new(sets: Vec<Arc<TombstoneSet>>) -> Self {
        let sets = sets.into_iter().filter(|s| !s.is_empty()).collect();
        Self { sets }
    }

    /// Registry that masks nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn test(&self, doc: DocId) -> bool {
        self.sets.iter().any(|s| s.contains(doc))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_set_sorts_and_dedups() {
        let set = TombstoneSet::new(vec![7, 3, 7, 1]);
        assert_eq!(set.len(), 3);
        assert!(set.contains(1));
        assert!(set.contains(3));
        assert!(set.contains(7));
        assert!(!set.contains(5));
    }

    #[test]
    fn test_registry_over_multiple_sets() {
        let a = Arc::new(TombstoneSet::new(vec![1, 5]));
        let b = Arc::new(TombstoneSet::new(vec![9]));
        let reg = MaskedDocsRegistry::new(vec![a, b]);

        assert!(!reg.is_empty());
        assert!(reg.test(1));
        assert!(reg.test(9));
        assert!(!reg.test(2));
    }

    #[test]
    fn test_registry_drops_empty_sets() {
        let empty = Arc::new(TombstoneSet::default());
        let reg = MaskedDocsRegistry::new(vec![empty]);
        assert!(reg.is_empty());
        assert!(!reg.test(0));
    }
}
