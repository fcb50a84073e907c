use crate::error::{HerdcastResult, JobError};
use crate::jobs::model::JobId;

/// Work queue feeding simulation workers.
///
/// Carries job identifiers only; the job row is the source of truth and the
/// pipeline is idempotent against redelivery, so at-least-once semantics are
/// fine. Clones share the same channel: many producers, many consumers, each
/// id delivered to exactly one consumer.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: async_channel::Sender<JobId>,
    rx: async_channel::Receiver<JobId>,
}

impl JobQueue {
    pub fn unbounded() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }

    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity);
        Self { tx, rx }
    }

    pub async fn enqueue(&self, job_id: JobId) -> HerdcastResult<()> {
        self.tx
            .send(job_id)
            .await
            .map_err(|_| JobError::QueueClosed)?;
        Ok(())
    }

    pub async fn dequeue(&self) -> HerdcastResult<JobId> {
        self.rx.recv().await.map_err(|_| JobError::QueueClosed.into())
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Closes the channel; pending dequeues drain the backlog then fail with
    /// [`JobError::QueueClosed`].
    pub fn close(&self) {
        self.tx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_each_id_to_one_consumer() {
        let queue = JobQueue::unbounded();
        let a = JobId::new();
        let b = JobId::new();
        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();

        let clone = queue.clone();
        let first = clone.dequeue().await.unwrap();
        let second = queue.dequeue().await.unwrap();
        assert_eq!(
            [first, second].into_iter().collect::<std::collections::BTreeSet<_>>(),
            [a, b].into_iter().collect()
        );
    }

    #[tokio::test]
    async fn close_drains_backlog_then_fails() {
        let queue = JobQueue::unbounded();
        let id = JobId::new();
        queue.enqueue(id).await.unwrap();
        queue.close();
        assert_eq!(queue.dequeue().await.unwrap(), id);
        assert!(queue.dequeue().await.is_err());
    }
}
