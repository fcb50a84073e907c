use std::sync::Arc;

use bytes::Bytes;
use herdcast::forecast::orchestrator::McSettings;
use herdcast::forecast::scenario::ScenarioParams;
use herdcast::jobs::pipeline::JobPipeline;
use herdcast::jobs::queue::JobQueue;
use herdcast::jobs::store::InMemoryJobStore;
use herdcast::live::InMemoryBus;
use herdcast::storage::artifacts::ArtifactStore;
use herdcast::storage::datasets::{DatasetRecord, InMemoryDatasetRepository, ingest_dataset};

/// Ten milking cows; the insemination on the last row pins the dataset's
/// factual report date to 2026-02-20.
pub const TEN_COW_CSV: &str = "\
animal_id,birth_date,status,lactation,last_calving_date,insem_date,days_in_milk
1,2021-03-01,milking,1,2025-12-01,,81
2,2021-03-01,milking,1,2025-12-01,,81
3,2021-03-01,milking,1,2025-12-01,,81
4,2021-03-01,milking,1,2025-12-01,,81
5,2021-03-01,milking,1,2025-12-01,,81
6,2021-03-01,milking,1,2025-12-01,,81
7,2021-03-01,milking,1,2025-12-01,,81
8,2021-03-01,milking,1,2025-12-01,,81
9,2021-03-01,milking,1,2025-12-01,,81
10,2021-03-01,milking,1,2025-12-01,2026-02-20,81
";

pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub datasets: Arc<InMemoryDatasetRepository>,
    pub artifacts: Arc<ArtifactStore>,
    pub bus: Arc<InMemoryBus>,
    pub queue: JobQueue,
    pub pipeline: Arc<JobPipeline>,
}

/// In-memory wiring of the whole job pipeline, sequential Monte Carlo.
pub fn harness() -> Harness {
    let store = Arc::new(InMemoryJobStore::new());
    let datasets = Arc::new(InMemoryDatasetRepository::new());
    let artifacts = Arc::new(ArtifactStore::in_memory());
    let bus = Arc::new(InMemoryBus::default());
    let queue = JobQueue::unbounded();
    let pipeline = Arc::new(JobPipeline::new(
        store.clone(),
        datasets.clone(),
        artifacts.clone(),
        bus.clone(),
        McSettings {
            parallel_enabled: false,
            max_processes: 1,
            batch_size: 4,
        },
        "test",
    ));
    Harness {
        store,
        datasets,
        artifacts,
        bus,
        queue,
        pipeline,
    }
}

pub async fn ingest_ten_cows(h: &Harness) -> DatasetRecord {
    ingest_dataset(
        h.datasets.as_ref(),
        h.artifacts.as_ref(),
        "herd.csv",
        Bytes::from_static(TEN_COW_CSV.as_bytes()),
    )
    .await
    .expect("ingest fixture dataset")
}

/// One-month, one-run scenario with stochastic removals switched off.
pub fn quiet_scenario(dataset_id: &str) -> ScenarioParams {
    let mut params = ScenarioParams::new(dataset_id);
    params.horizon_months = 1;
    params.mc_runs = 1;
    params.culling.estimate_from_dataset = false;
    params.culling.fallback_monthly_hazard = 0.0;
    params.replacement.enabled = false;
    params
}
