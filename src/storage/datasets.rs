use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::HerdcastResult;
use crate::herd::dataset::HerdDataset;
use crate::storage::artifacts::{ArtifactStore, Bucket, CONTENT_TYPE_CSV, dataset_key};

/// Metadata row of an ingested dataset; the raw csv lives in the datasets
/// bucket under `object_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub dataset_id: String,
    pub original_filename: String,
    pub object_key: String,
    pub n_rows: usize,
    pub report_date_suggested: Option<NaiveDate>,
    pub status_counts: BTreeMap<String, usize>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DatasetRepository: Send + Sync {
    async fn put(&self, record: DatasetRecord) -> HerdcastResult<()>;
    async fn get(&self, dataset_id: &str) -> HerdcastResult<Option<DatasetRecord>>;
}

#[derive(Debug, Default)]
pub struct InMemoryDatasetRepository {
    records: Mutex<HashMap<String, DatasetRecord>>,
}

impl InMemoryDatasetRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatasetRepository for InMemoryDatasetRepository {
    async fn put(&self, record: DatasetRecord) -> HerdcastResult<()> {
        self.records
            .lock()
            .expect("dataset repository lock poisoned")
            .insert(record.dataset_id.clone(), record);
        Ok(())
    }

    async fn get(&self, dataset_id: &str) -> HerdcastResult<Option<DatasetRecord>> {
        Ok(self
            .records
            .lock()
            .expect("dataset repository lock poisoned")
            .get(dataset_id)
            .cloned())
    }
}

/// Ingests an uploaded csv: parses it (rejecting files without the required
/// columns), stores the raw bytes under `datasets/{uuid}.csv`, and records
/// row count, status histogram and a suggested report date.
#[tracing::instrument(skip(repository, artifacts, bytes), fields(filename = original_filename))]
pub async fn ingest_dataset(
    repository: &dyn DatasetRepository,
    artifacts: &ArtifactStore,
    original_filename: &str,
    bytes: Bytes,
) -> HerdcastResult<DatasetRecord> {
    let dataset = HerdDataset::from_csv_bytes(&bytes)?;

    let dataset_id = Uuid::new_v4().to_string();
    let object_key = dataset_key(&dataset_id);
    artifacts
        .put_bytes(Bucket::Datasets, &object_key, bytes, CONTENT_TYPE_CSV)
        .await?;

    let record = DatasetRecord {
        dataset_id,
        original_filename: original_filename.to_string(),
        object_key,
        n_rows: dataset.len(),
        report_date_suggested: dataset.suggest_report_date(),
        status_counts: dataset.status_histogram(),
        created_at: Utc::now(),
    };
    repository.put(record.clone()).await?;
    tracing::info!(dataset_id = %record.dataset_id, rows = record.n_rows, "dataset ingested");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DataError, HerdcastError};

    const CSV: &str = "\
animal_id,birth_date,status,lactation,last_calving_date,days_in_milk
1,2021-01-01,milking,1,2025-12-01,40
2,2022-05-01,heifer,0,,
";

    #[tokio::test]
    async fn ingest_stores_bytes_and_metadata() {
        let repo = InMemoryDatasetRepository::new();
        let artifacts = ArtifactStore::in_memory();

        let record = ingest_dataset(&repo, &artifacts, "herd.csv", Bytes::from_static(CSV.as_bytes()))
            .await
            .unwrap();

        assert_eq!(record.n_rows, 2);
        assert_eq!(record.status_counts.get("milking"), Some(&1));
        assert!(record.object_key.ends_with(".csv"));

        let stored = artifacts
            .get_bytes(Bucket::Datasets, &record.object_key)
            .await
            .unwrap();
        assert_eq!(stored.as_ref(), CSV.as_bytes());

        let fetched = repo.get(&record.dataset_id).await.unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn malformed_csv_is_rejected_before_storage() {
        let repo = InMemoryDatasetRepository::new();
        let artifacts = ArtifactStore::in_memory();

        let err = ingest_dataset(&repo, &artifacts, "bad.csv", Bytes::from_static(b"a,b\n1,2\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, HerdcastError::Data(DataError::MissingColumn(_))));
    }
}
