use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use tracing_subscriber::EnvFilter;

use herdcast::error::{HerdcastResult, StorageError, SystemError};
use herdcast::forecast::scenario::ScenarioParams;
use herdcast::jobs::model::JobStatus;
use herdcast::jobs::pipeline::{ExportKind, JobPipeline};
use herdcast::jobs::queue::JobQueue;
use herdcast::jobs::store::{CreateJob, InMemoryJobStore};
use herdcast::jobs::supervisor::WorkerSupervisor;
use herdcast::live::InMemoryBus;
use herdcast::storage::artifacts::ArtifactStore;
use herdcast::storage::datasets::{InMemoryDatasetRepository, ingest_dataset};
use herdcast::Settings;

/// Forecast worker: either a long-running service loop, or a one-shot run
/// over a local dataset + scenario pair.
#[derive(Parser, Debug)]
#[command(name = "herdcast-worker")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Run a single forecast for this dataset csv, then exit.
    #[arg(long, requires = "scenario_json")]
    dataset_csv: Option<PathBuf>,

    /// Scenario parameters as json; `dataset_id` is filled in from the
    /// ingested csv.
    #[arg(long, requires = "dataset_csv")]
    scenario_json: Option<PathBuf>,

    /// Where one-shot runs write their csv/xlsx exports.
    #[arg(long, default_value = "./out")]
    out_dir: PathBuf,
}

fn io_err(err: std::io::Error) -> SystemError {
    SystemError::Generic(err.to_string())
}

fn build_object_store(settings: &Settings) -> HerdcastResult<Arc<dyn ObjectStore>> {
    if settings.artifact_endpoint.is_empty() {
        std::fs::create_dir_all(&settings.artifact_root).map_err(io_err)?;
        let store = LocalFileSystem::new_with_prefix(&settings.artifact_root)
            .map_err(StorageError::ObjectStore)?;
        Ok(Arc::new(store))
    } else {
        let store = AmazonS3Builder::new()
            .with_endpoint(&settings.artifact_endpoint)
            .with_access_key_id(&settings.artifact_access_key)
            .with_secret_access_key(&settings.artifact_secret_key)
            .with_bucket_name("herdcast")
            .with_region("us-east-1")
            .with_allow_http(true)
            .build()
            .map_err(StorageError::ObjectStore)?;
        Ok(Arc::new(store))
    }
}

#[tokio::main]
async fn main() -> HerdcastResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = cli.settings.clone();

    let store = Arc::new(InMemoryJobStore::new());
    let datasets = Arc::new(InMemoryDatasetRepository::new());
    let artifacts = Arc::new(ArtifactStore::new(
        build_object_store(&settings)?,
        settings.bucket_names(),
    ));
    let bus = Arc::new(InMemoryBus::default());
    let queue = JobQueue::unbounded();

    let pipeline = Arc::new(JobPipeline::new(
        store.clone(),
        datasets.clone(),
        artifacts.clone(),
        bus.clone(),
        settings.mc(),
        settings.simulation_version.clone(),
    ));
    let supervisor = WorkerSupervisor::new(
        queue.clone(),
        pipeline.clone(),
        store.clone(),
        settings.stuck_job_timeout_minutes,
    );

    match (&cli.dataset_csv, &cli.scenario_json) {
        (Some(dataset_csv), Some(scenario_json)) => {
            run_once(
                &cli,
                dataset_csv,
                scenario_json,
                &pipeline,
                &queue,
                supervisor,
                datasets.as_ref(),
                artifacts.as_ref(),
            )
            .await
        }
        _ => {
            let shutdown = supervisor.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received; shutting down");
                    shutdown.cancel();
                }
            });
            supervisor.run().await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_once(
    cli: &Cli,
    dataset_csv: &PathBuf,
    scenario_json: &PathBuf,
    pipeline: &Arc<JobPipeline>,
    queue: &JobQueue,
    supervisor: WorkerSupervisor,
    datasets: &InMemoryDatasetRepository,
    artifacts: &ArtifactStore,
) -> HerdcastResult<()> {
    let csv_bytes = Bytes::from(std::fs::read(dataset_csv).map_err(io_err)?);
    let scenario_text = std::fs::read_to_string(scenario_json).map_err(io_err)?;
    let mut params: ScenarioParams =
        serde_json::from_str(&scenario_text).map_err(StorageError::Serialization)?;

    let filename = dataset_csv
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "dataset.csv".to_string());
    let record = ingest_dataset(datasets, artifacts, &filename, csv_bytes).await?;
    params.dataset_id = record.dataset_id.clone();

    let job = pipeline.submit(queue, CreateJob::new(params)).await?;
    tracing::info!(job_id = %job.job_id, "job submitted; running worker");

    let shutdown = supervisor.shutdown_token();
    let worker = tokio::spawn(async move { supervisor.run().await });

    let store = pipeline.store().clone();
    let finished = loop {
        tokio::time::sleep(Duration::from_millis(200)).await;
        match store.get(&job.job_id).await? {
            Some(row) if row.status.is_terminal() => break row,
            Some(_) => continue,
            None => {
                shutdown.cancel();
                let _ = worker.await;
                return Err(SystemError::Generic("job row disappeared".into()).into());
            }
        }
    };
    shutdown.cancel();
    let _ = worker.await;

    match finished.status {
        JobStatus::Succeeded => {
            std::fs::create_dir_all(&cli.out_dir).map_err(io_err)?;
            for (kind, name) in [(ExportKind::Csv, "forecast.csv"), (ExportKind::Xlsx, "forecast.xlsx")] {
                let payload = pipeline.read_export(&job.job_id, kind).await?;
                std::fs::write(cli.out_dir.join(name), &payload).map_err(io_err)?;
            }
            let result = pipeline.read_job_result(&job.job_id).await?;
            tracing::info!(
                points = result.series_p50.points.len(),
                months = result.events.len(),
                out_dir = %cli.out_dir.display(),
                "forecast complete; exports written"
            );
            Ok(())
        }
        status => {
            tracing::error!(
                status = %status,
                error = finished.error_message.as_deref().unwrap_or("unknown"),
                "forecast job did not succeed"
            );
            Err(SystemError::Generic(format!("job finished as {status}")).into())
        }
    }
}
