pub mod artifacts;
pub mod datasets;

pub use artifacts::{ArtifactKeys, ArtifactStore, Bucket, BucketNames};
pub use datasets::{DatasetRecord, DatasetRepository, InMemoryDatasetRepository, ingest_dataset};
