use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::error::HerdcastResult;
use crate::jobs::model::{ForecastJob, JobId, JobStatus};
use crate::jobs::store::JobStore;
use crate::live::{JobEvent, JobSnapshot, ProgressBus};

/// Close code sent when the requested job does not exist.
pub const CLOSE_CODE_NOT_FOUND: u16 = 4404;
pub const CLOSE_CODE_NORMAL: u16 = 1000;

/// Why the stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamClose {
    /// A terminal event was delivered.
    Terminal,
    /// The job id is unknown; a synthetic `job_failed` was sent first.
    NotFound,
    /// The client went away; the subscription was dropped.
    ClientGone,
}

impl StreamClose {
    pub fn close_code(self) -> u16 {
        match self {
            Self::NotFound => CLOSE_CODE_NOT_FOUND,
            Self::Terminal | Self::ClientGone => CLOSE_CODE_NORMAL,
        }
    }
}

/// Relays one job's bus events into `client`, with heartbeats every
/// `heartbeat` of bus silence.
///
/// Terminal jobs get their current snapshot as a single event and an
/// immediate close; unknown ids get a synthetic `job_failed` with
/// `JOB_NOT_FOUND` and close code 4404. The subscription is dropped when the
/// client disconnects.
#[tracing::instrument(skip_all, fields(job_id = %job_id))]
pub async fn stream_job_events(
    store: &dyn JobStore,
    bus: &dyn ProgressBus,
    job_id: &JobId,
    heartbeat: Duration,
    client: mpsc::Sender<JobEvent>,
) -> HerdcastResult<StreamClose> {
    let Some(job) = store.get(job_id).await? else {
        let _ = client
            .send(JobEvent::JobFailed {
                snapshot: missing_snapshot(job_id),
                error_message: "JOB_NOT_FOUND".to_string(),
            })
            .await;
        return Ok(StreamClose::NotFound);
    };

    if job.status.is_terminal() {
        let _ = client.send(terminal_snapshot_event(&job)).await;
        return Ok(StreamClose::Terminal);
    }

    let mut events = bus.subscribe(job_id);

    // The job may have finished between the row read and the subscription;
    // re-check so the terminal event cannot be missed.
    if let Some(job) = store.get(job_id).await?
        && job.status.is_terminal()
    {
        let _ = client.send(terminal_snapshot_event(&job)).await;
        return Ok(StreamClose::Terminal);
    }

    loop {
        match tokio::time::timeout(heartbeat, events.next()).await {
            Err(_silence) => {
                let beat = JobEvent::Heartbeat {
                    job_id: job_id.to_string(),
                    ts: Utc::now(),
                };
                if client.send(beat).await.is_err() {
                    return Ok(StreamClose::ClientGone);
                }
            }
            Ok(Some(event)) => {
                let terminal = event.is_terminal();
                if client.send(event).await.is_err() {
                    return Ok(StreamClose::ClientGone);
                }
                if terminal {
                    return Ok(StreamClose::Terminal);
                }
            }
            Ok(None) => {
                // Channel closed under us (terminal published elsewhere);
                // fall back to the row snapshot.
                if let Some(job) = store.get(job_id).await?
                    && job.status.is_terminal()
                {
                    let _ = client.send(terminal_snapshot_event(&job)).await;
                }
                return Ok(StreamClose::Terminal);
            }
        }
    }
}

fn missing_snapshot(job_id: &JobId) -> JobSnapshot {
    JobSnapshot {
        job_id: job_id.to_string(),
        status: JobStatus::Failed,
        progress_pct: 0,
        completed_runs: 0,
        total_runs: 0,
        ts: Utc::now(),
    }
}

/// The single event a late subscriber receives for an already-terminal job.
pub fn terminal_snapshot_event(job: &ForecastJob) -> JobEvent {
    let snapshot = JobSnapshot::of(job);
    match job.status {
        JobStatus::Succeeded => JobEvent::JobSucceeded {
            snapshot,
            partial_result: None,
        },
        JobStatus::Canceled => JobEvent::JobFailed {
            snapshot,
            error_message: "JOB_CANCELED".to_string(),
        },
        _ => JobEvent::JobFailed {
            error_message: job
                .error_message
                .clone()
                .unwrap_or_else(|| "JOB_FAILED".to_string()),
            snapshot,
        },
    }
}
