//! The staging log: ordered layers of pending disk changes, keyed by
//! key, with conflict detection that opens a fresh stage whenever a
//! further mutation would race an in-flight flush of the same key.

use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

#[derive(Clone, Debug)]
pub enum ChangeOp {
    Add(Bytes),
    Remove,
}

#[derive(Clone, Debug)]
pub struct Change<K> {
    pub id: u64,
    pub key: K,
    pub op: ChangeOp,
}

pub struct Stage<K> {
    pub id: u64,
    pub changes: HashMap<K, Change<K>>,
    pub remove_all: bool,
}

/// What `resolve` found for a key, scanning stages newest-to-oldest.
pub enum Resolution<K> {
    /// A `removeAll` stage shadows everything older, regardless of
    /// whether the key itself appears in it.
    Tombstone,
    Change(Change<K>),
    NotFound,
}

pub struct StagingLog<K> {
    next_change_id: u64,
    next_stage_id: u64,
    stages: VecDeque<Stage<K>>,
}

impl<K> Default for StagingLog<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> StagingLog<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            next_change_id: 0,
            next_stage_id: 0,
            stages: VecDeque::new(),
        }
    }

    fn conflicts(&self, key: &K) -> bool {
        match self.stages.back() {
            None => false,
            Some(stage) => stage.remove_all || stage.changes.contains_key(key),
        }
    }

    fn alloc_change_id(&mut self) -> u64 {
        let id = self.next_change_id;
        self.next_change_id += 1;
        id
    }

    fn alloc_stage_id(&mut self) -> u64 {
        let id = self.next_stage_id;
        self.next_stage_id += 1;
        id
    }

    fn push_change(&mut self, key: K, op: ChangeOp) -> u64 {
        let id = self.alloc_change_id();

        if self.conflicts(&key) {
            let stage_id = self.alloc_stage_id();
            let mut changes = HashMap::new();
            changes.insert(key.clone(), Change { id, key, op });
            self.stages.push_back(Stage {
                id: stage_id,
                changes,
                remove_all: false,
            });
            return id;
        }

        if self.stages.is_empty() {
            let stage_id = self.alloc_stage_id();
            self.stages.push_back(Stage {
                id: stage_id,
                changes: HashMap::new(),
                remove_all: false,
            });
        }

        let stage = self.stages.back_mut().expect("just ensured non-empty");
        stage.changes.insert(key.clone(), Change { id, key, op });
        id
    }

    pub fn add(&mut self, key: K, bytes: Bytes) -> u64 {
        self.push_change(key, ChangeOp::Add(bytes))
    }

    pub fn remove(&mut self, key: K) -> u64 {
        self.push_change(key, ChangeOp::Remove)
    }

    /// Opens a new `removeAll` stage holding a synthetic Remove for
    /// every key observed in any existing stage.
    pub fn remove_all(&mut self) -> u64 {
        let mut keys = HashSet::new();
        for stage in &self.stages {
            keys.extend(stage.changes.keys().cloned());
        }

        let stage_id = self.alloc_stage_id();
        let mut changes = HashMap::new();
        for key in keys {
            let id = self.alloc_change_id();
            changes.insert(
                key.clone(),
                Change {
                    id,
                    key,
                    op: ChangeOp::Remove,
                },
            );
        }

        self.stages.push_back(Stage {
            id: stage_id,
            changes,
            remove_all: true,
        });
        stage_id
    }

    pub fn resolve(&self, key: &K) -> Resolution<K> {
        for stage in self.stages.iter().rev() {
            if stage.remove_all {
                return Resolution::Tombstone;
            }
            if let Some(change) = stage.changes.get(key) {
                return Resolution::Change(change.clone());
            }
        }
        Resolution::NotFound
    }

    pub fn oldest_stage(&self) -> Option<(u64, bool, Vec<Change<K>>)> {
        self.stages
            .front()
            .map(|stage| (stage.id, stage.remove_all, stage.changes.values().cloned().collect()))
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Removes the acknowledged `(key, change_id)` pairs from the named
    /// stage, dropping the stage if it becomes empty. A mismatched
    /// change id (the key's current entry in that stage doesn't match
    /// what was reported flushed) is a no-op — it means the stage was
    /// superseded out from under this flush pass and must be retried.
    pub fn flushed(&mut self, stage_id: u64, acked: &[(K, u64)]) {
        let Some(pos) = self.stages.iter().position(|s| s.id == stage_id) else {
            return;
        };

        {
            let stage = &mut self.stages[pos];
            for (key, change_id) in acked {
                let matches = stage.changes.get(key).map(|c| c.id) == Some(*change_id);
                if matches {
                    stage.changes.remove(key);
                }
            }
        }

        if self.stages[pos].changes.is_empty() {
            self.stages.remove(pos);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_without_conflict_shares_last_stage() {
        let mut log = StagingLog::<&str>::new();
        log.add("a", Bytes::from_static(b"1"));
        log.add("b", Bytes::from_static(b"2"));
        assert_eq!(log.stage_count(), 1);
    }

    #[test]
    fn conflicting_add_opens_new_stage() {
        let mut log = StagingLog::<&str>::new();
        log.add("a", Bytes::from_static(b"1"));
        log.add("a", Bytes::from_static(b"2")); // same key again -> conflict
        assert_eq!(log.stage_count(), 2);
    }

    #[test]
    fn remove_all_shadows_everything_older() {
        let mut log = StagingLog::<&str>::new();
        log.add("a", Bytes::from_static(b"1"));
        log.remove_all();
        assert!(matches!(log.resolve(&"a"), Resolution::Tombstone));
        assert!(matches!(log.resolve(&"missing"), Resolution::Tombstone));
    }

    #[test]
    fn resolve_scans_newest_to_oldest() {
        let mut log = StagingLog::<&str>::new();
        log.add("a", Bytes::from_static(b"1"));
        log.remove("a".into()); // conflicts -> new stage
        match log.resolve(&"a") {
            Resolution::Change(c) => assert!(matches!(c.op, ChangeOp::Remove)),
            _ => panic!("expected a Remove change"),
        }
    }

    #[test]
    fn flushed_drops_empty_stage_and_ignores_stale_ids() {
        let mut log = StagingLog::<&str>::new();
        let id_a = log.add("a", Bytes::from_static(b"1"));
        let _id_b = log.add("b", Bytes::from_static(b"2"));
        let stage_id = log.oldest_stage().unwrap().0;

        // mismatched id is a no-op
        log.flushed(stage_id, &[("a", id_a + 1000)]);
        assert_eq!(log.stage_count(), 1);

        log.flushed(stage_id, &[("a", id_a)]);
        assert_eq!(log.stage_count(), 1); // "b" still pending

        let id_b_actual = match log.resolve(&"b") {
            Resolution::Change(c) => c.id,
            _ => panic!("expected b to still be staged"),
        };
        log.flushed(stage_id, &[("b", id_b_actual)]);
        assert!(log.is_empty());
    }
}
