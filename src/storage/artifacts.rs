use std::sync::Arc;

use bytes::Bytes;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions};
use strum::Display;

use crate::error::{HerdcastResult, StorageError};
use crate::jobs::model::JobId;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_CSV: &str = "text/csv";
pub const CONTENT_TYPE_XLSX: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Logical artifact buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Bucket {
    Datasets,
    Results,
    Exports,
}

/// Configured bucket names, one per logical bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketNames {
    pub datasets: String,
    pub results: String,
    pub exports: String,
}

impl Default for BucketNames {
    fn default() -> Self {
        Self {
            datasets: "datasets".to_string(),
            results: "results".to_string(),
            exports: "exports".to_string(),
        }
    }
}

impl BucketNames {
    fn name(&self, bucket: Bucket) -> &str {
        match bucket {
            Bucket::Datasets => &self.datasets,
            Bucket::Results => &self.results,
            Bucket::Exports => &self.exports,
        }
    }
}

/// Opaque content-addressed blob store with three logical buckets, backed by
/// any [`ObjectStore`] implementation (in-memory for tests, local filesystem
/// or S3-compatible stores in deployments).
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    inner: Arc<dyn ObjectStore>,
    buckets: BucketNames,
}

impl ArtifactStore {
    pub fn new(inner: Arc<dyn ObjectStore>, buckets: BucketNames) -> Self {
        Self { inner, buckets }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), BucketNames::default())
    }

    fn path(&self, bucket: Bucket, key: &str) -> Path {
        Path::from(format!("{}/{}", self.buckets.name(bucket), key))
    }

    #[tracing::instrument(skip(self, payload), fields(bucket = %bucket, key = key))]
    pub async fn put_bytes(
        &self,
        bucket: Bucket,
        key: &str,
        payload: Bytes,
        content_type: &str,
    ) -> HerdcastResult<()> {
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            content_type.to_string().into(),
        );
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.inner
            .put_opts(&self.path(bucket, key), payload.into(), opts)
            .await
            .map_err(StorageError::ObjectStore)?;
        tracing::debug!("stored artifact");
        Ok(())
    }

    pub async fn get_bytes(&self, bucket: Bucket, key: &str) -> HerdcastResult<Bytes> {
        let result = self
            .inner
            .get(&self.path(bucket, key))
            .await
            .map_err(|err| match err {
                object_store::Error::NotFound { .. } => StorageError::ObjectMissing {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                other => StorageError::ObjectStore(other),
            })?;
        Ok(result
            .bytes()
            .await
            .map_err(StorageError::ObjectStore)?)
    }

    pub async fn exists(&self, bucket: Bucket, key: &str) -> HerdcastResult<bool> {
        match self.inner.head(&self.path(bucket, key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(StorageError::ObjectStore(err).into()),
        }
    }

    /// Object deletion is best-effort at call sites; the error carries the
    /// reason for skip reporting.
    pub async fn delete(&self, bucket: Bucket, key: &str) -> Result<(), StorageError> {
        match self.inner.delete(&self.path(bucket, key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(StorageError::ObjectStore(err)),
        }
    }
}

/// The artifact key set of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKeys {
    pub result: String,
    pub csv: String,
    pub xlsx: String,
}

impl ArtifactKeys {
    pub fn for_job(job_id: &JobId) -> Self {
        Self {
            result: format!("results/{job_id}.json"),
            csv: format!("exports/{job_id}.csv"),
            xlsx: format!("exports/{job_id}.xlsx"),
        }
    }
}

/// Storage key of an uploaded dataset.
pub fn dataset_key(dataset_id: &str) -> String {
    format!("datasets/{dataset_id}.csv")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HerdcastError;

    #[tokio::test]
    async fn put_get_roundtrip_per_bucket() {
        let store = ArtifactStore::in_memory();
        store
            .put_bytes(Bucket::Results, "results/x.json", Bytes::from_static(b"{}"), CONTENT_TYPE_JSON)
            .await
            .unwrap();
        let payload = store.get_bytes(Bucket::Results, "results/x.json").await.unwrap();
        assert_eq!(payload.as_ref(), b"{}");
        // Same key in another bucket is a different object.
        assert!(!store.exists(Bucket::Exports, "results/x.json").await.unwrap());
    }

    #[tokio::test]
    async fn missing_object_maps_to_object_missing() {
        let store = ArtifactStore::in_memory();
        let err = store.get_bytes(Bucket::Datasets, "datasets/nope.csv").await.unwrap_err();
        assert!(matches!(
            err,
            HerdcastError::Storage(StorageError::ObjectMissing { .. })
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = ArtifactStore::in_memory();
        store
            .put_bytes(Bucket::Exports, "exports/x.csv", Bytes::from_static(b"a"), CONTENT_TYPE_CSV)
            .await
            .unwrap();
        store.delete(Bucket::Exports, "exports/x.csv").await.unwrap();
        store.delete(Bucket::Exports, "exports/x.csv").await.unwrap();
        assert!(!store.exists(Bucket::Exports, "exports/x.csv").await.unwrap());
    }
}
