use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::forecast::result::ForecastOutput;
use crate::jobs::model::{ForecastJob, JobId, JobStatus};

pub mod stream;

/// Default per-subscriber buffer of the in-memory bus; slow subscribers
/// falling further behind lose the oldest messages.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// Job-state excerpt carried by every bus event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub progress_pct: u8,
    pub completed_runs: u32,
    pub total_runs: u32,
    pub ts: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn of(job: &ForecastJob) -> Self {
        Self {
            job_id: job.job_id.to_string(),
            status: job.status,
            progress_pct: job.progress_pct,
            completed_runs: job.completed_runs,
            total_runs: job.total_runs,
            ts: Utc::now(),
        }
    }
}

/// Typed progress events, discriminated by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    JobProgress {
        #[serde(flatten)]
        snapshot: JobSnapshot,
        partial_result: Option<Box<ForecastOutput>>,
    },
    JobSucceeded {
        #[serde(flatten)]
        snapshot: JobSnapshot,
        partial_result: Option<Box<ForecastOutput>>,
    },
    JobFailed {
        #[serde(flatten)]
        snapshot: JobSnapshot,
        error_message: String,
    },
    /// Emitted by the stream endpoint only, never published on the bus.
    Heartbeat { job_id: String, ts: DateTime<Utc> },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::JobSucceeded { .. } | Self::JobFailed { .. })
    }
}

/// Publish/subscribe channel keyed by job id.
///
/// `publish` is fire-and-forget: it never blocks on subscribers and a
/// failure must never fail the job (the return value is informational).
/// Subscribers receive messages in publish order per channel; slow
/// subscribers may lose messages, the terminal event plus the stream
/// endpoint's heartbeats guarantee eventual convergence.
pub trait ProgressBus: Send + Sync {
    fn publish(&self, job_id: &JobId, event: JobEvent) -> bool;
    fn subscribe(&self, job_id: &JobId) -> EventStream;
}

/// Broadcast-backed bus for single-process deployments and tests.
#[derive(Debug)]
pub struct InMemoryBus {
    channels: Mutex<HashMap<JobId, broadcast::Sender<JobEvent>>>,
    capacity: usize,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl ProgressBus for InMemoryBus {
    fn publish(&self, job_id: &JobId, event: JobEvent) -> bool {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        let terminal = event.is_terminal();
        let sender = channels
            .entry(*job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        // No receivers is fine: events are ephemeral.
        let _ = sender.send(event);
        if terminal {
            // Channel is done; receivers drain the terminal event then close.
            channels.remove(job_id);
        }
        true
    }

    fn subscribe(&self, job_id: &JobId) -> EventStream {
        let mut channels = self.channels.lock().expect("bus lock poisoned");
        let sender = channels
            .entry(*job_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        EventStream {
            rx: sender.subscribe(),
        }
    }
}

/// Receiving side of one job channel.
pub struct EventStream {
    rx: broadcast::Receiver<JobEvent>,
}

impl EventStream {
    /// Next event in publish order; lagged gaps are skipped. `None` once the
    /// channel is closed.
    pub async fn next(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "slow subscriber lost bus events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(job_id: &JobId, status: JobStatus, progress: u8) -> JobSnapshot {
        JobSnapshot {
            job_id: job_id.to_string(),
            status,
            progress_pct: progress,
            completed_runs: 0,
            total_runs: 4,
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let bus = InMemoryBus::default();
        let job_id = JobId::new();
        let mut stream = bus.subscribe(&job_id);

        for progress in [10u8, 40, 70] {
            bus.publish(
                &job_id,
                JobEvent::JobProgress {
                    snapshot: snapshot(&job_id, JobStatus::Running, progress),
                    partial_result: None,
                },
            );
        }

        for expected in [10u8, 40, 70] {
            match stream.next().await.unwrap() {
                JobEvent::JobProgress { snapshot, .. } => {
                    assert_eq!(snapshot.progress_pct, expected)
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn terminal_event_closes_the_channel() {
        let bus = InMemoryBus::default();
        let job_id = JobId::new();
        let mut stream = bus.subscribe(&job_id);

        bus.publish(
            &job_id,
            JobEvent::JobFailed {
                snapshot: snapshot(&job_id, JobStatus::Failed, 10),
                error_message: "boom".into(),
            },
        );

        assert!(stream.next().await.unwrap().is_terminal());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fire_and_forget() {
        let bus = InMemoryBus::default();
        let job_id = JobId::new();
        assert!(bus.publish(
            &job_id,
            JobEvent::Heartbeat {
                job_id: job_id.to_string(),
                ts: Utc::now()
            }
        ));
    }

    #[test]
    fn events_are_tagged_by_type() {
        let job_id = JobId::new();
        let event = JobEvent::JobFailed {
            snapshot: snapshot(&job_id, JobStatus::Failed, 0),
            error_message: "DATASET_NOT_FOUND: gone".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_failed");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_message"], "DATASET_NOT_FOUND: gone");
    }
}
