use std::time::Duration;

use clap::Parser;

use crate::forecast::orchestrator::McSettings;
use crate::storage::artifacts::BucketNames;

/// Runtime settings, sourced from the command line or `HERDCAST_*`
/// environment variables.
#[derive(Parser, Debug, Clone)]
#[command(name = "herdcast", about = "Dairy herd forecasting service core")]
pub struct Settings {
    /// Work queue connection string; the in-process queue ignores it.
    #[arg(long, env = "HERDCAST_QUEUE_URL", default_value = "memory://forecast")]
    pub queue_url: String,

    /// Artifact store endpoint; empty selects a local directory store.
    #[arg(long, env = "HERDCAST_ARTIFACT_ENDPOINT", default_value = "")]
    pub artifact_endpoint: String,

    #[arg(long, env = "HERDCAST_ARTIFACT_ACCESS_KEY", default_value = "")]
    pub artifact_access_key: String,

    #[arg(long, env = "HERDCAST_ARTIFACT_SECRET_KEY", default_value = "", hide_env_values = true)]
    pub artifact_secret_key: String,

    /// Directory backing the local artifact store when no endpoint is set.
    #[arg(long, env = "HERDCAST_ARTIFACT_ROOT", default_value = "./herdcast-data")]
    pub artifact_root: String,

    #[arg(long, env = "HERDCAST_BUCKET_DATASETS", default_value = "datasets")]
    pub bucket_datasets: String,

    #[arg(long, env = "HERDCAST_BUCKET_RESULTS", default_value = "results")]
    pub bucket_results: String,

    #[arg(long, env = "HERDCAST_BUCKET_EXPORTS", default_value = "exports")]
    pub bucket_exports: String,

    #[arg(long, env = "HERDCAST_MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    #[arg(long, env = "HERDCAST_STUCK_JOB_TIMEOUT_MINUTES", default_value_t = 30)]
    pub stuck_job_timeout_minutes: i64,

    #[arg(
        long,
        env = "HERDCAST_MC_PARALLEL_ENABLED",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub mc_parallel_enabled: bool,

    #[arg(long, env = "HERDCAST_MC_MAX_PROCESSES", default_value_t = 24)]
    pub mc_max_processes: usize,

    #[arg(long, env = "HERDCAST_MC_BATCH_SIZE", default_value_t = 32)]
    pub mc_batch_size: usize,

    #[arg(long, env = "HERDCAST_STREAM_HEARTBEAT_SECONDS", default_value_t = 15)]
    pub stream_heartbeat_seconds: u64,

    #[arg(long, env = "HERDCAST_JOB_EXPIRES_IN_DAYS", default_value_t = 30)]
    pub job_expires_in_days: i64,

    #[arg(long, env = "HERDCAST_SIMULATION_VERSION", default_value = "1.1.0")]
    pub simulation_version: String,
}

impl Default for Settings {
    fn default() -> Self {
        // Defaults only; no real argv parsing.
        Self::parse_from(std::iter::empty::<&str>())
    }
}

impl Settings {
    pub fn mc(&self) -> McSettings {
        McSettings {
            parallel_enabled: self.mc_parallel_enabled,
            max_processes: self.mc_max_processes.max(1),
            batch_size: self.mc_batch_size.max(1),
        }
    }

    pub fn bucket_names(&self) -> BucketNames {
        BucketNames {
            datasets: self.bucket_datasets.clone(),
            results: self.bucket_results.clone(),
            exports: self.bucket_exports.clone(),
        }
    }

    pub fn stream_heartbeat(&self) -> Duration {
        Duration::from_secs(self.stream_heartbeat_seconds.max(1))
    }
}
