// === Public Modules (The Canonical Paths) ===
pub mod config;
pub mod error;
pub mod export;
pub mod forecast;
pub mod herd;
pub mod jobs;
pub mod live;
pub mod sim;
pub mod storage;

// === Facades (Re-exporting internals) ===
// The pieces a service front wires together, without spelling out the
// module paths.
pub use crate::config::Settings;
pub use crate::error::{ErrorCode, HerdcastError, HerdcastResult};
pub use crate::forecast::orchestrator::{McSettings, run_forecast};
pub use crate::forecast::result::ForecastOutput;
pub use crate::forecast::scenario::ScenarioParams;
pub use crate::jobs::model::{ForecastJob, JobId, JobStatus};
pub use crate::jobs::pipeline::JobPipeline;
pub use crate::jobs::supervisor::WorkerSupervisor;
