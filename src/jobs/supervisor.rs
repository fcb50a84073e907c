use std::sync::Arc;

use chrono::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::HerdcastResult;
use crate::jobs::model::JobId;
use crate::jobs::pipeline::JobPipeline;
use crate::jobs::queue::JobQueue;
use crate::jobs::store::JobStore;

/// Long-running worker process: recovers stuck jobs on startup, then
/// dequeues job ids and executes them sequentially until shutdown.
pub struct WorkerSupervisor {
    queue: JobQueue,
    pipeline: Arc<JobPipeline>,
    store: Arc<dyn JobStore>,
    stuck_timeout: Duration,
    shutdown: CancellationToken,
}

impl WorkerSupervisor {
    pub fn new(
        queue: JobQueue,
        pipeline: Arc<JobPipeline>,
        store: Arc<dyn JobStore>,
        stuck_timeout_minutes: i64,
    ) -> Self {
        Self {
            queue,
            pipeline,
            store,
            stuck_timeout: Duration::minutes(stuck_timeout_minutes),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token to request a graceful stop; the current job finishes first.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Re-queues jobs left `running` past the stuck timeout. The job row is
    /// reset first so a redelivered id re-executes cleanly.
    #[tracing::instrument(skip(self))]
    pub async fn recover_stuck_jobs(&self) -> HerdcastResult<Vec<JobId>> {
        let stuck = self.store.find_stuck_running(self.stuck_timeout).await?;
        let mut requeued = Vec::with_capacity(stuck.len());
        for job in stuck {
            if self.store.requeue(&job.job_id).await?.is_some() {
                self.queue.enqueue(job.job_id).await?;
                requeued.push(job.job_id);
            }
        }
        if !requeued.is_empty() {
            tracing::info!(count = requeued.len(), "re-queued stuck running jobs");
        }
        Ok(requeued)
    }

    /// Worker loop. Each job runs inside its own task so a panic cannot take
    /// the supervisor down; jobs are still executed one at a time.
    pub async fn run(&self) -> HerdcastResult<()> {
        self.recover_stuck_jobs().await?;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("worker supervisor shutting down");
                    return Ok(());
                }
                dequeued = self.queue.dequeue() => {
                    let Ok(job_id) = dequeued else {
                        tracing::info!("job queue closed; stopping worker");
                        return Ok(());
                    };
                    let pipeline = self.pipeline.clone();
                    let outcome =
                        tokio::spawn(async move { pipeline.run_job(job_id).await }).await;
                    if let Err(join_err) = outcome {
                        tracing::error!(job_id = %job_id, error = %join_err, "job task panicked");
                    }
                }
            }
        }
    }
}
