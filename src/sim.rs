pub mod engine;
pub mod metrics;

pub use engine::{HerdSimulation, ModelConfig};
pub use metrics::{DailySnapshot, EventTally, MetricsRecord, RecordCadence};
