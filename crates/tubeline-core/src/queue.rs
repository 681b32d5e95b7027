//! Pending-work queue: source items minus the checkpoint, in source order

use rustc_hash::FxHashSet;

use crate::checkpoint::CheckpointIndex;
use crate::work::WorkItem;

/// Items still to attempt in this run.
///
/// Built once at startup: items whose id is in the checkpoint are dropped,
/// repeated ids keep their first occurrence, and an optional limit caps the
/// number of *new* items.
#[derive(Debug)]
pub struct WorkQueue<P> {
    items: Vec<WorkItem<P>>,
    already_done: usize,
    duplicates: usize,
}

impl<P> WorkQueue<P> {
    pub fn pending(
        items: Vec<WorkItem<P>>,
        completed: &CheckpointIndex,
        limit: Option<usize>,
    ) -> Self {
        let mut seen = FxHashSet::default();
        let mut already_done = 0usize;
        let mut duplicates = 0usize;
        let mut pending = Vec::new();

        for item in items {
            if limit.is_some_and(|max| pending.len() >= max) {
                break;
            }
            if completed.contains(&item.id) {
                already_done += 1;
                continue;
            }
            if !seen.insert(item.id.clone()) {
                duplicates += 1;
                continue;
            }
            pending.push(item);
        }

        if duplicates > 0 {
            log::debug!("{duplicates} repeated ids dropped from work queue");
        }
        log::debug!("{} items in work queue", pending.len());
        Self {
            items: pending,
            already_done,
            duplicates,
        }
    }

    /// Items remaining to process
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Source items skipped because the checkpoint already has them
    pub fn already_done(&self) -> usize {
        self.already_done
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

impl<P> IntoIterator for WorkQueue<P> {
    type Item = WorkItem<P>;
    type IntoIter = std::vec::IntoIter<WorkItem<P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointStore, ProcessedRecord};
    use crate::work::Fields;

    fn items(ids: &[&str]) -> Vec<WorkItem<()>> {
        ids.iter().map(|id| WorkItem::new(*id, ())).collect()
    }

    fn ids(q: WorkQueue<()>) -> Vec<String> {
        q.into_iter().map(|i| i.id).collect()
    }

    fn completed(done: &[&str]) -> (tempfile::TempDir, CheckpointIndex) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        let mut store = CheckpointStore::open(&path, &[]).unwrap();
        store
            .append(done.iter().map(|id| ProcessedRecord::ok(*id, Fields::new())))
            .unwrap();
        store.flush().unwrap();
        let index = store.index().clone();
        (dir, index)
    }

    #[test]
    fn nothing_done_keeps_all_in_order() {
        let q = WorkQueue::pending(items(&["a", "b", "c"]), &CheckpointIndex::default(), None);
        assert_eq!(q.total(), 3);
        assert_eq!(ids(q), ["a", "b", "c"]);
    }

    #[test]
    fn checkpointed_ids_skipped() {
        let (_dir, done) = completed(&["a", "c"]);
        let q = WorkQueue::pending(items(&["a", "b", "c", "d"]), &done, None);
        assert_eq!(q.already_done(), 2);
        assert_eq!(ids(q), ["b", "d"]);
    }

    #[test]
    fn limit_counts_new_items_only() {
        let (_dir, done) = completed(&["a", "b"]);
        let q = WorkQueue::pending(items(&["a", "b", "c", "d", "e"]), &done, Some(2));
        assert_eq!(ids(q), ["c", "d"]);
    }

    #[test]
    fn repeated_ids_first_wins() {
        let q = WorkQueue::pending(
            items(&["x", "y", "x", "z", "y"]),
            &CheckpointIndex::default(),
            None,
        );
        assert_eq!(q.duplicates(), 2);
        assert_eq!(ids(q), ["x", "y", "z"]);
    }

    #[test]
    fn empty_queue() {
        let q: WorkQueue<()> = WorkQueue::pending(vec![], &CheckpointIndex::default(), None);
        assert_eq!(q.total(), 0);
        assert!(ids(q).is_empty());
    }
}
