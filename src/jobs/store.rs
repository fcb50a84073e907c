use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::HerdcastResult;
use crate::forecast::scenario::ScenarioParams;
use crate::jobs::model::{ForecastJob, JobId, JobStatus};
use crate::storage::artifacts::{ArtifactKeys, ArtifactStore, Bucket};

/// Initial progress written when a job enters `running`.
pub const INITIAL_PROGRESS_PCT: u8 = 10;

/// Submission request for a new job.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub params: ScenarioParams,
    pub scenario_id: Option<String>,
    pub owner_user_id: Option<String>,
    pub expires_in_days: i64,
}

impl CreateJob {
    pub fn new(params: ScenarioParams) -> Self {
        Self {
            params,
            scenario_id: None,
            owner_user_id: None,
            expires_in_days: 30,
        }
    }

    pub fn with_scenario_id(self, scenario_id: impl Into<String>) -> Self {
        Self {
            scenario_id: Some(scenario_id.into()),
            ..self
        }
    }

    pub fn with_owner(self, owner_user_id: impl Into<String>) -> Self {
        Self {
            owner_user_id: Some(owner_user_id.into()),
            ..self
        }
    }
}

/// History listing filters; matches are owner-scoped and exclude
/// soft-deleted rows.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub status: Option<JobStatus>,
    /// Case-insensitive substring over job, dataset and scenario ids.
    pub q: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub page: usize,
    pub limit: usize,
}

/// Durable store of forecast jobs with the lifecycle guards of the job state
/// machine: terminal rows are returned unchanged by any further mark_*, and
/// progress writes for jobs that left `running` are silently dropped.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, req: CreateJob) -> HerdcastResult<ForecastJob>;

    async fn get(&self, job_id: &JobId) -> HerdcastResult<Option<ForecastJob>>;

    async fn mark_running(
        &self,
        job_id: &JobId,
        progress_pct: u8,
        total_runs: u32,
    ) -> HerdcastResult<Option<ForecastJob>>;

    async fn update_progress(
        &self,
        job_id: &JobId,
        progress_pct: u8,
        completed_runs: Option<u32>,
        total_runs: Option<u32>,
    ) -> HerdcastResult<Option<ForecastJob>>;

    async fn mark_failed(&self, job_id: &JobId, message: &str)
    -> HerdcastResult<Option<ForecastJob>>;

    /// Requests cancellation: the worker observes the status change on its
    /// next progress write and stops dispatching batches.
    async fn mark_canceled(&self, job_id: &JobId) -> HerdcastResult<Option<ForecastJob>>;

    async fn mark_succeeded(
        &self,
        job_id: &JobId,
        keys: &ArtifactKeys,
    ) -> HerdcastResult<Option<ForecastJob>>;

    /// Running jobs whose `started_at` is older than `timeout`.
    async fn find_stuck_running(&self, timeout: Duration) -> HerdcastResult<Vec<ForecastJob>>;

    /// Resets a job to `queued` with zeroed counters so it can be re-run.
    async fn requeue(&self, job_id: &JobId) -> HerdcastResult<Option<ForecastJob>>;

    async fn list_for_owner(
        &self,
        owner_user_id: &str,
        query: &JobQuery,
    ) -> HerdcastResult<(Vec<ForecastJob>, usize)>;

    async fn soft_delete_for_owner(
        &self,
        job_id: &JobId,
        owner_user_id: &str,
    ) -> HerdcastResult<Option<ForecastJob>>;
}

// ================================================================================================
// In-memory implementation
// ================================================================================================

/// Reference [`JobStore`] over a mutex-guarded map; the durable deployments
/// swap in a relational implementation behind the same trait.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, ForecastJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_job<T>(
        &self,
        job_id: &JobId,
        mutate: impl FnOnce(&mut ForecastJob) -> T,
    ) -> Option<(T, ForecastJob)> {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        let job = jobs.get_mut(job_id).filter(|j| j.deleted_at.is_none())?;
        let out = mutate(job);
        Some((out, job.clone()))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, req: CreateJob) -> HerdcastResult<ForecastJob> {
        let queued_at = Utc::now();
        let job = ForecastJob {
            job_id: JobId::new(),
            dataset_id: req.params.dataset_id.clone(),
            scenario_id: req.scenario_id,
            total_runs: req.params.mc_runs,
            params: req.params,
            status: JobStatus::Queued,
            progress_pct: 0,
            completed_runs: 0,
            error_message: None,
            result_object_key: None,
            csv_object_key: None,
            xlsx_object_key: None,
            queued_at,
            started_at: None,
            finished_at: None,
            expires_at: Some(queued_at + Duration::days(req.expires_in_days)),
            deleted_at: None,
            owner_user_id: req.owner_user_id,
        };
        self.jobs
            .lock()
            .expect("job store lock poisoned")
            .insert(job.job_id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> HerdcastResult<Option<ForecastJob>> {
        Ok(self
            .jobs
            .lock()
            .expect("job store lock poisoned")
            .get(job_id)
            .filter(|j| j.deleted_at.is_none())
            .cloned())
    }

    async fn mark_running(
        &self,
        job_id: &JobId,
        progress_pct: u8,
        total_runs: u32,
    ) -> HerdcastResult<Option<ForecastJob>> {
        Ok(self
            .with_job(job_id, |job| {
                if job.status.is_terminal() {
                    return;
                }
                job.status = JobStatus::Running;
                job.progress_pct = progress_pct.min(100);
                job.completed_runs = 0;
                job.total_runs = total_runs;
                job.started_at = Some(Utc::now());
            })
            .map(|(_, job)| job))
    }

    async fn update_progress(
        &self,
        job_id: &JobId,
        progress_pct: u8,
        completed_runs: Option<u32>,
        total_runs: Option<u32>,
    ) -> HerdcastResult<Option<ForecastJob>> {
        Ok(self
            .with_job(job_id, |job| {
                if job.status != JobStatus::Running {
                    return;
                }
                job.progress_pct = progress_pct.min(100);
                if let Some(completed) = completed_runs {
                    job.completed_runs = completed;
                }
                if let Some(total) = total_runs {
                    job.total_runs = total;
                }
            })
            .map(|(_, job)| job))
    }

    async fn mark_failed(
        &self,
        job_id: &JobId,
        message: &str,
    ) -> HerdcastResult<Option<ForecastJob>> {
        Ok(self
            .with_job(job_id, |job| {
                if job.status.is_terminal() {
                    return;
                }
                job.status = JobStatus::Failed;
                job.error_message = Some(message.to_string());
                job.finished_at = Some(Utc::now());
            })
            .map(|(_, job)| job))
    }

    async fn mark_canceled(&self, job_id: &JobId) -> HerdcastResult<Option<ForecastJob>> {
        Ok(self
            .with_job(job_id, |job| {
                if job.status.is_terminal() {
                    return;
                }
                job.status = JobStatus::Canceled;
                job.finished_at = Some(Utc::now());
            })
            .map(|(_, job)| job))
    }

    async fn mark_succeeded(
        &self,
        job_id: &JobId,
        keys: &ArtifactKeys,
    ) -> HerdcastResult<Option<ForecastJob>> {
        Ok(self
            .with_job(job_id, |job| {
                if job.status.is_terminal() {
                    return;
                }
                job.status = JobStatus::Succeeded;
                job.progress_pct = 100;
                job.completed_runs = job.completed_runs.max(job.total_runs);
                job.error_message = None;
                job.result_object_key = Some(keys.result.clone());
                job.csv_object_key = Some(keys.csv.clone());
                job.xlsx_object_key = Some(keys.xlsx.clone());
                job.finished_at = Some(Utc::now());
            })
            .map(|(_, job)| job))
    }

    async fn find_stuck_running(&self, timeout: Duration) -> HerdcastResult<Vec<ForecastJob>> {
        let threshold = Utc::now() - timeout;
        Ok(self
            .jobs
            .lock()
            .expect("job store lock poisoned")
            .values()
            .filter(|job| {
                job.deleted_at.is_none()
                    && job.status == JobStatus::Running
                    && job.started_at.map(|s| s < threshold).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn requeue(&self, job_id: &JobId) -> HerdcastResult<Option<ForecastJob>> {
        Ok(self
            .with_job(job_id, |job| {
                job.status = JobStatus::Queued;
                job.progress_pct = 0;
                job.completed_runs = 0;
                job.total_runs = job.params.mc_runs;
                job.error_message = None;
                job.started_at = None;
                job.finished_at = None;
            })
            .map(|(_, job)| job))
    }

    async fn list_for_owner(
        &self,
        owner_user_id: &str,
        query: &JobQuery,
    ) -> HerdcastResult<(Vec<ForecastJob>, usize)> {
        let jobs = self.jobs.lock().expect("job store lock poisoned");
        let needle = query.q.as_deref().map(str::to_lowercase);
        let mut matches: Vec<ForecastJob> = jobs
            .values()
            .filter(|job| {
                job.deleted_at.is_none()
                    && job.owner_user_id.as_deref() == Some(owner_user_id)
                    && query.status.map(|s| job.status == s).unwrap_or(true)
                    && query.date_from.map(|d| job.queued_at >= d).unwrap_or(true)
                    && query.date_to.map(|d| job.queued_at <= d).unwrap_or(true)
                    && needle
                        .as_deref()
                        .map(|needle| {
                            job.job_id.to_string().to_lowercase().contains(needle)
                                || job.dataset_id.to_lowercase().contains(needle)
                                || job
                                    .scenario_id
                                    .as_deref()
                                    .map(|s| s.to_lowercase().contains(needle))
                                    .unwrap_or(false)
                        })
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));

        let total = matches.len();
        let page = query.page.max(1);
        let limit = query.limit.clamp(1, 100);
        let rows = matches
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .collect();
        Ok((rows, total))
    }

    async fn soft_delete_for_owner(
        &self,
        job_id: &JobId,
        owner_user_id: &str,
    ) -> HerdcastResult<Option<ForecastJob>> {
        let mut jobs = self.jobs.lock().expect("job store lock poisoned");
        let Some(job) = jobs
            .get_mut(job_id)
            .filter(|j| j.deleted_at.is_none() && j.owner_user_id.as_deref() == Some(owner_user_id))
        else {
            return Ok(None);
        };
        job.deleted_at = Some(Utc::now());
        Ok(Some(job.clone()))
    }
}

// ================================================================================================
// Bulk soft-delete
// ================================================================================================

/// Why one id of a bulk delete request was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteSkipReason {
    NotFound,
    JobActive,
    ObjectDeleteFailed { alias: String, reason: String },
}

impl fmt::Display for DeleteSkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::JobActive => write!(f, "JOB_ACTIVE"),
            Self::ObjectDeleteFailed { alias, reason } => {
                write!(f, "OBJECT_DELETE_FAILED:{alias}:{reason}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkDeleteOutcome {
    Deleted,
    Skipped(DeleteSkipReason),
}

/// Soft-deletes a batch of jobs for one owner.
///
/// Active jobs are skipped; artifact objects are removed first and a failed
/// removal skips the row so the operator can retry. Re-running the same
/// batch reports already-deleted ids as `NOT_FOUND`.
pub async fn bulk_soft_delete(
    store: &dyn JobStore,
    artifacts: &ArtifactStore,
    owner_user_id: &str,
    ids: &[JobId],
) -> HerdcastResult<Vec<(JobId, BulkDeleteOutcome)>> {
    let mut outcomes = Vec::with_capacity(ids.len());
    for job_id in ids {
        let outcome = delete_one(store, artifacts, owner_user_id, job_id).await?;
        outcomes.push((*job_id, outcome));
    }
    Ok(outcomes)
}

async fn delete_one(
    store: &dyn JobStore,
    artifacts: &ArtifactStore,
    owner_user_id: &str,
    job_id: &JobId,
) -> HerdcastResult<BulkDeleteOutcome> {
    let Some(job) = store.get(job_id).await? else {
        return Ok(BulkDeleteOutcome::Skipped(DeleteSkipReason::NotFound));
    };
    if job.owner_user_id.as_deref() != Some(owner_user_id) {
        return Ok(BulkDeleteOutcome::Skipped(DeleteSkipReason::NotFound));
    }
    if job.status.is_active() {
        return Ok(BulkDeleteOutcome::Skipped(DeleteSkipReason::JobActive));
    }

    let objects = [
        ("result", Bucket::Results, job.result_object_key.as_deref()),
        ("csv", Bucket::Exports, job.csv_object_key.as_deref()),
        ("xlsx", Bucket::Exports, job.xlsx_object_key.as_deref()),
    ];
    for (alias, bucket, key) in objects {
        let Some(key) = key else { continue };
        if let Err(err) = artifacts.delete(bucket, key).await {
            return Ok(BulkDeleteOutcome::Skipped(
                DeleteSkipReason::ObjectDeleteFailed {
                    alias: alias.to_string(),
                    reason: err.to_string(),
                },
            ));
        }
    }

    match store.soft_delete_for_owner(job_id, owner_user_id).await? {
        Some(_) => Ok(BulkDeleteOutcome::Deleted),
        None => Ok(BulkDeleteOutcome::Skipped(DeleteSkipReason::NotFound)),
    }
}
