//! Versioned key-value store.
//!
//! A [Tree] is an ordered map from byte keys to byte values with a monotone
//! version counter. Every mutation appends one undo entry to a journal, so
//! the tree can be restored to any earlier version in O(changes) and forked
//! at any earlier version into an independent copy. Snapshots are free: a
//! snapshot handle is just the journal length at the time of capture.
//!
//! Trees are not synchronized; callers serialize access externally.

use std::collections::BTreeMap;

/// Journaled map with O(1) snapshots and cheap historical forks.
#[derive(Clone, Default)]
pub struct Tree {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    // (key, value before the mutation); None marks a key that was absent
    journal: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        let prior = self.entries.insert(key.to_vec(), value.to_vec());
        self.journal.push((key.to_vec(), prior));
    }

    /// Removes `key`. Deleting an absent key is a no-op and records no
    /// journal entry.
    pub fn delete(&mut self, key: &[u8]) {
        if let Some(prior) = self.entries.remove(key) {
            self.journal.push((key.to_vec(), Some(prior)));
        }
    }

    /// Returns a handle for the current version. Two successive calls with
    /// no mutation in between return the same handle.
    pub fn snapshot(&self) -> usize {
        self.journal.len()
    }

    /// Restores the contents observed at `snap` and discards every newer
    /// version.
    ///
    /// Panics if `snap` is greater than the current version; snapshots are
    /// consumed oldest-first by construction, so callers never hit this.
    pub fn rollback(&mut self, snap: usize) {
        assert!(
            snap <= self.journal.len(),
            "rollback past the current version ({} > {})",
            snap,
            self.journal.len(),
        );
        while self.journal.len() > snap {
            let (key, prior) = self.journal.pop().unwrap();
            match prior {
                Some(v) => {
                    self.entries.insert(key, v);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// Returns an independent tree whose contents equal those at `snap`.
    /// The copy starts with an empty journal; neither side observes writes
    /// to the other.
    pub fn copy_at(&self, snap: usize) -> Tree {
        assert!(
            snap <= self.journal.len(),
            "copy past the current version ({} > {})",
            snap,
            self.journal.len(),
        );
        let mut entries = self.entries.clone();
        for (key, prior) in self.journal[snap..].iter().rev() {
            match prior {
                Some(v) => {
                    entries.insert(key.clone(), v.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
        Tree {
            entries,
            journal: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(t: &Tree) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        let mut probe = |k: &[u8]| {
            if let Some(v) = t.get(k) {
                out.push((k.to_vec(), v.to_vec()));
            }
        };
        for k in [b"a".as_ref(), b"b", b"c", b"d"] {
            probe(k);
        }
        out
    }

    #[test]
    fn round_trip_rollback() {
        let mut t = Tree::new();
        t.insert(b"a", b"1");
        t.insert(b"b", b"2");
        t.delete(b"a");
        let want = contents(&t);
        let snap = t.snapshot();

        t.insert(b"a", b"3");
        t.insert(b"c", b"4");
        t.delete(b"b");
        t.insert(b"b", b"5");
        t.rollback(snap);

        assert_eq!(contents(&t), want);
        assert_eq!(t.get(b"a"), None);
        assert_eq!(t.get(b"b"), Some(b"2".as_ref()));
        assert_eq!(t.get(b"c"), None);
    }

    #[test]
    fn fork_independence() {
        let mut t = Tree::new();
        t.insert(b"a", b"1");
        let snap = t.snapshot();
        t.insert(b"a", b"2");
        t.insert(b"b", b"3");

        let mut fork = t.copy_at(snap);
        assert_eq!(fork.get(b"a"), Some(b"1".as_ref()));
        assert_eq!(fork.get(b"b"), None);

        fork.insert(b"a", b"9");
        fork.delete(b"b");
        assert_eq!(t.get(b"a"), Some(b"2".as_ref()));
        assert_eq!(t.get(b"b"), Some(b"3".as_ref()));

        t.delete(b"a");
        assert_eq!(fork.get(b"a"), Some(b"9".as_ref()));
    }

    #[test]
    fn rollback_does_not_disturb_forks() {
        let mut t = Tree::new();
        t.insert(b"a", b"1");
        let snap = t.snapshot();
        t.insert(b"b", b"2");
        let fork = t.copy_at(t.snapshot());
        t.rollback(snap);
        assert_eq!(fork.get(b"a"), Some(b"1".as_ref()));
        assert_eq!(fork.get(b"b"), Some(b"2".as_ref()));
        assert_eq!(t.get(b"b"), None);
    }

    #[test]
    fn snapshot_is_stable_without_mutation() {
        let mut t = Tree::new();
        t.insert(b"a", b"1");
        assert_eq!(t.snapshot(), t.snapshot());
        t.delete(b"missing");
        assert_eq!(t.snapshot(), 1, "no-op delete must not advance version");
    }

    #[test]
    fn delete_absent_is_noop_across_rollback() {
        let mut t = Tree::new();
        t.insert(b"a", b"1");
        let snap = t.snapshot();
        t.delete(b"nope");
        t.insert(b"b", b"2");
        t.rollback(snap);
        assert_eq!(t.get(b"a"), Some(b"1".as_ref()));
        assert_eq!(t.get(b"b"), None);
    }

    #[test]
    fn snapshot_after_rollback_is_not_older() {
        let mut t = Tree::new();
        t.insert(b"a", b"1");
        let snap = t.snapshot();
        t.insert(b"b", b"2");
        t.rollback(snap);
        assert!(t.snapshot() >= snap);
    }

    #[test]
    #[should_panic(expected = "rollback past the current version")]
    fn rollback_forward_panics() {
        let mut t = Tree::new();
        t.insert(b"a", b"1");
        t.rollback(17);
    }

    #[test]
    fn random_ops_restore_exactly() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::from_seed([7; 32]);
        let mut t = Tree::new();
        let mut shadow: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for _ in 0..200 {
            let k = vec![rng.gen_range(0u8..16)];
            let v = vec![rng.gen::<u8>()];
            t.insert(&k, &v);
            shadow.insert(k, v);
        }
        let snap = t.snapshot();
        let frozen = shadow.clone();
        for _ in 0..500 {
            let k = vec![rng.gen_range(0u8..16)];
            if rng.gen_bool(0.3) {
                t.delete(&k);
            } else {
                t.insert(&k, &[rng.gen::<u8>()]);
            }
        }
        t.rollback(snap);
        for (k, v) in &frozen {
            assert_eq!(t.get(k), Some(v.as_slice()));
        }
        assert_eq!(t.len(), frozen.len());
    }
}
