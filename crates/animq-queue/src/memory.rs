//! In-process queue backend.

use std::collections::{BTreeSet, HashMap};

use animq_models::JobId;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{QueueError, QueueResult};
use crate::queue::{QueueBackend, QueueSnapshot};

/// Ordering key: score first, then insertion sequence for equal scores.
type EntryKey = (i64, u64, JobId);

#[derive(Debug, Default)]
struct MemoryState {
    ordered: BTreeSet<EntryKey>,
    index: HashMap<JobId, (i64, u64)>,
    next_seq: u64,
}

/// Queue held in process memory.
///
/// Not durable across restarts; startup recovery re-inserts jobs whose
/// status is still `Queued`.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn push(&self, job_id: &JobId, score: i64) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.index.contains_key(job_id) {
            return Err(QueueError::AlreadyQueued(job_id.clone()));
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.ordered.insert((score, seq, job_id.clone()));
        state.index.insert(job_id.clone(), (score, seq));
        debug!(job_id = %job_id, score, "Queued job in memory");
        Ok(())
    }

    async fn pop_min(&self) -> QueueResult<JobId> {
        let mut state = self.state.lock().await;
        let (_, _, job_id) = state.ordered.pop_first().ok_or(QueueError::QueueEmpty)?;
        state.index.remove(&job_id);
        Ok(job_id)
    }

    async fn remove(&self, job_id: &JobId) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let (score, seq) = state
            .index
            .remove(job_id)
            .ok_or_else(|| QueueError::NotQueued(job_id.clone()))?;
        state.ordered.remove(&(score, seq, job_id.clone()));
        Ok(())
    }

    async fn contains(&self, job_id: &JobId) -> QueueResult<bool> {
        Ok(self.state.lock().await.index.contains_key(job_id))
    }

    async fn snapshot(&self) -> QueueResult<QueueSnapshot> {
        let state = self.state.lock().await;
        Ok(QueueSnapshot {
            size: state.ordered.len() as u64,
            job_ids: state.ordered.iter().map(|(_, _, id)| id.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_duplicate_push_is_rejected() {
        let queue = MemoryQueue::new();
        let id = JobId::from("1");

        queue.push(&id, 100).await.unwrap();
        let err = queue.push(&id, 200).await.unwrap_err();
        assert!(err.is_already_queued());
        assert_eq!(queue.snapshot().await.unwrap().size, 1);
    }

    #[tokio::test]
    async fn test_pop_returns_oldest_first() {
        let queue = MemoryQueue::new();
        queue.push(&JobId::from("b"), 20).await.unwrap();
        queue.push(&JobId::from("a"), 10).await.unwrap();
        // Same score as "b": insertion order decides.
        queue.push(&JobId::from("c"), 20).await.unwrap();

        assert_eq!(queue.pop_min().await.unwrap().as_str(), "a");
        assert_eq!(queue.pop_min().await.unwrap().as_str(), "b");
        assert_eq!(queue.pop_min().await.unwrap().as_str(), "c");
        assert!(queue.pop_min().await.unwrap_err().is_queue_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_entry() {
        let queue = MemoryQueue::new();
        let id = JobId::from("x");
        assert!(queue.remove(&id).await.unwrap_err().is_not_queued());

        queue.push(&id, 1).await.unwrap();
        queue.remove(&id).await.unwrap();
        assert!(!queue.contains(&id).await.unwrap());
        assert!(queue.remove(&id).await.unwrap_err().is_not_queued());
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered() {
        let queue = MemoryQueue::new();
        queue.push(&JobId::from("late"), 30).await.unwrap();
        queue.push(&JobId::from("early"), 10).await.unwrap();

        let snapshot = queue.snapshot().await.unwrap();
        assert_eq!(snapshot.size, 2);
        assert_eq!(snapshot.job_ids, vec![JobId::from("early"), JobId::from("late")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pops_are_exclusive() {
        let queue = Arc::new(MemoryQueue::new());
        for i in 0..5 {
            queue.push(&JobId::from(format!("job-{i}")), i).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..16 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move { queue.pop_min().await }));
        }

        let mut popped = HashSet::new();
        let mut empty = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(id) => assert!(popped.insert(id), "job returned twice"),
                Err(e) => {
                    assert!(e.is_queue_empty());
                    empty += 1;
                }
            }
        }
        assert_eq!(popped.len(), 5);
        assert_eq!(empty, 11);
    }
}
