use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use strum::{Display, EnumString};
use tokio::sync::mpsc;

use crate::error::{
    DataError, HerdcastError, HerdcastResult, JobError, StorageError, SystemError,
};
use crate::export;
use crate::forecast::orchestrator::{McSettings, run_forecast};
use crate::forecast::result::ForecastOutput;
use crate::forecast::scenario::ScenarioParams;
use crate::herd::dataset::HerdDataset;
use crate::jobs::model::{ForecastJob, JobId, JobStatus};
use crate::jobs::queue::JobQueue;
use crate::jobs::store::{CreateJob, INITIAL_PROGRESS_PCT, JobStore};
use crate::live::{JobEvent, JobSnapshot, ProgressBus};
use crate::storage::artifacts::{
    ArtifactKeys, ArtifactStore, Bucket, CONTENT_TYPE_CSV, CONTENT_TYPE_JSON, CONTENT_TYPE_XLSX,
};
use crate::storage::datasets::DatasetRepository;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Export artifact kinds served at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ExportKind {
    Csv,
    Xlsx,
}

/// Executes forecast jobs end to end: load dataset, run the Monte Carlo
/// orchestrator, upload artifacts, drive the job row and publish progress.
///
/// Execution is idempotent against redelivery: a terminal job early-returns
/// without side effects. Any failure marks the job `failed` and publishes a
/// terminal event; the caller (worker supervisor) always survives.
pub struct JobPipeline {
    store: Arc<dyn JobStore>,
    datasets: Arc<dyn DatasetRepository>,
    artifacts: Arc<ArtifactStore>,
    bus: Arc<dyn ProgressBus>,
    mc: McSettings,
    simulation_version: String,
}

impl JobPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        datasets: Arc<dyn DatasetRepository>,
        artifacts: Arc<ArtifactStore>,
        bus: Arc<dyn ProgressBus>,
        mc: McSettings,
        simulation_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            datasets,
            artifacts,
            bus,
            mc,
            simulation_version: simulation_version.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Validates a scenario, persists the job row and pushes its id onto the
    /// queue. Invalid scenarios never reach `queued`.
    pub async fn submit(&self, queue: &JobQueue, req: CreateJob) -> HerdcastResult<ForecastJob> {
        req.params.validate()?;
        let job = self.store.create(req).await?;
        queue.enqueue(job.job_id).await?;
        tracing::info!(job_id = %job.job_id, dataset = %job.dataset_id, "forecast job queued");
        Ok(job)
    }

    /// Runs one job to a terminal state. Errors never escape: they become a
    /// `failed` row plus a terminal bus event.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn run_job(&self, job_id: JobId) {
        match self.execute(job_id).await {
            Ok(()) => {}
            Err(HerdcastError::Job(JobError::Canceled(_))) => {
                tracing::info!("job canceled; leaving the row as-is");
            }
            Err(err) => {
                tracing::error!(error = %err, "forecast job failed");
                let message = format!("{}: {err}", err.code());
                match self.store.mark_failed(&job_id, &message).await {
                    Ok(Some(job)) => {
                        self.publish_terminal(&job, None);
                    }
                    Ok(None) => {}
                    Err(store_err) => {
                        tracing::error!(error = %store_err, "could not persist job failure");
                    }
                }
            }
        }
    }

    async fn execute(&self, job_id: JobId) -> HerdcastResult<()> {
        let Some(job) = self.store.get(&job_id).await? else {
            tracing::warn!("dequeued unknown job id");
            return Ok(());
        };
        if job.status.is_terminal() {
            // Redelivery of finished work; at-least-once queues make this
            // normal.
            return Ok(());
        }

        let params = job.params.clone();
        if let Some(running) = self
            .store
            .mark_running(&job_id, INITIAL_PROGRESS_PCT, params.mc_runs)
            .await?
        {
            self.publish_progress(&running, None);
        }

        let Some(dataset_row) = self.datasets.get(&params.dataset_id).await? else {
            return Err(DataError::DatasetNotFound(params.dataset_id.clone()).into());
        };

        let csv_bytes = with_retry(|| {
            self.artifacts
                .get_bytes(Bucket::Datasets, &dataset_row.object_key)
        })
        .await?;
        let dataset = HerdDataset::from_csv_bytes(&csv_bytes)?;

        let result = self.run_orchestrator(&job_id, dataset, params).await?;

        let keys = ArtifactKeys::for_job(&job_id);
        let result_bytes =
            Bytes::from(serde_json::to_vec(&result).map_err(StorageError::Serialization)?);
        let csv_export = Bytes::from(export::forecast_csv(&result)?.into_bytes());
        let xlsx_export = Bytes::from(export::forecast_xlsx(&result)?);

        with_retry(|| {
            self.artifacts.put_bytes(
                Bucket::Results,
                &keys.result,
                result_bytes.clone(),
                CONTENT_TYPE_JSON,
            )
        })
        .await?;
        with_retry(|| {
            self.artifacts
                .put_bytes(Bucket::Exports, &keys.csv, csv_export.clone(), CONTENT_TYPE_CSV)
        })
        .await?;
        with_retry(|| {
            self.artifacts.put_bytes(
                Bucket::Exports,
                &keys.xlsx,
                xlsx_export.clone(),
                CONTENT_TYPE_XLSX,
            )
        })
        .await?;

        if let Some(done) = self.store.mark_succeeded(&job_id, &keys).await?
            && done.status == JobStatus::Succeeded
        {
            self.bus.publish(
                &job_id,
                JobEvent::JobSucceeded {
                    snapshot: JobSnapshot::of(&done),
                    partial_result: Some(Box::new(result)),
                },
            );
            tracing::info!("forecast job succeeded");
        }
        Ok(())
    }

    /// Bridges the synchronous Monte Carlo orchestrator to the async job
    /// row: partial results stream over a channel, progress writes happen
    /// here, and a job that leaves `running` (canceled) trips the stop flag
    /// checked by the orchestrator between batches.
    async fn run_orchestrator(
        &self,
        job_id: &JobId,
        dataset: HerdDataset,
        params: ScenarioParams,
    ) -> HerdcastResult<ForecastOutput> {
        let (tx, mut rx) = mpsc::unbounded_channel::<(u32, u32, ForecastOutput)>();
        let stop = Arc::new(AtomicBool::new(false));

        let stop_flag = stop.clone();
        let mc = self.mc;
        let version = self.simulation_version.clone();
        let handle = tokio::task::spawn_blocking(move || {
            run_forecast(&dataset, &params, &mc, &version, |completed, total, partial| {
                let _ = tx.send((completed, total, partial.clone()));
                !stop_flag.load(Ordering::Relaxed)
            })
        });

        while let Some((completed, total, partial)) = rx.recv().await {
            let progress = (INITIAL_PROGRESS_PCT as u32 + 80 * completed / total.max(1)).min(90);
            match self
                .store
                .update_progress(job_id, progress as u8, Some(completed), Some(total))
                .await
            {
                Ok(Some(row)) if row.status == JobStatus::Running => {
                    self.publish_progress(&row, Some(&partial));
                }
                Ok(_) => {
                    // The row left `running` under us; stop the orchestration.
                    stop.store(true, Ordering::Relaxed);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "progress write failed");
                }
            }
        }

        handle
            .await
            .map_err(|join| SystemError::TaskJoin(join.to_string()))?
    }

    /// Reads back a finished job's structured result artifact.
    pub async fn read_job_result(&self, job_id: &JobId) -> HerdcastResult<ForecastOutput> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let key = match (&job.status, &job.result_object_key) {
            (JobStatus::Succeeded, Some(key)) => key.clone(),
            _ => return Err(JobError::NotReady(job_id.to_string()).into()),
        };
        let payload = self.artifacts.get_bytes(Bucket::Results, &key).await?;
        serde_json::from_slice(&payload)
            .map_err(|_| JobError::ResultReadFailed(job_id.to_string()).into())
    }

    /// Reads back one export artifact.
    pub async fn read_export(&self, job_id: &JobId, kind: ExportKind) -> HerdcastResult<Bytes> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        let key = match kind {
            ExportKind::Csv => job.csv_object_key,
            ExportKind::Xlsx => job.xlsx_object_key,
        };
        let Some(key) = key.filter(|_| job.status == JobStatus::Succeeded) else {
            return Err(JobError::ExportNotReady(job_id.to_string()).into());
        };
        self.artifacts.get_bytes(Bucket::Exports, &key).await
    }

    fn publish_progress(&self, job: &ForecastJob, partial: Option<&ForecastOutput>) {
        self.bus.publish(
            &job.job_id,
            JobEvent::JobProgress {
                snapshot: JobSnapshot::of(job),
                partial_result: partial.map(|p| Box::new(p.clone())),
            },
        );
    }

    fn publish_terminal(&self, job: &ForecastJob, result: Option<&ForecastOutput>) {
        let event = match job.status {
            JobStatus::Succeeded => JobEvent::JobSucceeded {
                snapshot: JobSnapshot::of(job),
                partial_result: result.map(|r| Box::new(r.clone())),
            },
            _ => JobEvent::JobFailed {
                snapshot: JobSnapshot::of(job),
                error_message: job
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "JOB_FAILED".to_string()),
            },
        };
        self.bus.publish(&job.job_id, event);
    }
}

fn retryable(err: &HerdcastError) -> bool {
    // A missing object will not appear by itself; everything else at the
    // storage boundary is treated as transient.
    !matches!(
        err,
        HerdcastError::Storage(StorageError::ObjectMissing { .. })
    )
}

/// Runs `op` up to three times with exponential back-off (0.5s * 2^k).
async fn with_retry<T, F, Fut>(op: F) -> HerdcastResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = HerdcastResult<T>>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 >= RETRY_ATTEMPTS || !retryable(&err) => return Err(err),
            Err(err) => {
                attempt += 1;
                tracing::warn!(error = %err, attempt, "storage call failed; backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}
