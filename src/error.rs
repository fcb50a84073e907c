use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

pub type HerdcastResult<T> = Result<T, HerdcastError>;

#[derive(Debug, Error)]
pub enum HerdcastError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    System(#[from] SystemError),
}

/// Errors related to dataset parsing, scenario validation, and sampler setup.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Missing required dataset column: '{0}'")]
    MissingColumn(String),

    #[error("Invalid dataset row {line}: {msg}")]
    InvalidRow { line: u64, msg: String },

    #[error("Failed to read dataset csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("No factual date found in dataset; cannot resolve report date")]
    NoFactualDates,

    #[error("Dataset not found: '{0}'")]
    DatasetNotFound(String),

    #[error("Empirical sampler '{0}' has no values")]
    EmptySampler(String),

    #[error("report_date {requested} does not match dataset factual date {resolved}")]
    ReportDateMismatch {
        requested: NaiveDate,
        resolved: NaiveDate,
    },

    #[error("future_date {0} is outside the forecast horizon")]
    FutureDateOutOfRange(NaiveDate),

    #[error("future_date {0} must be a month start")]
    FutureDateNotMonthStart(NaiveDate),

    #[error("Invalid scenario: {0}")]
    Validation(String),
}

/// Errors raised by the discrete-event simulator itself.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Simulated clock overflow at {0}")]
    ClockOverflow(NaiveDate),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Errors related to the job lifecycle, queue, and result readiness.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: '{0}'")]
    NotFound(String),

    #[error("Job '{0}' has no result yet")]
    NotReady(String),

    #[error("Job '{0}' has no exports yet")]
    ExportNotReady(String),

    #[error("Failed to read result payload for job '{0}'")]
    ResultReadFailed(String),

    #[error("Job '{0}' was canceled")]
    Canceled(String),

    #[error("Job queue is closed")]
    QueueClosed,
}

/// Errors related to the artifact store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object store operation failed: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Object missing: {bucket}/{key}")]
    ObjectMissing { bucket: String, key: String },

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors produced while rendering csv/xlsx exports.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to write csv export: {0}")]
    Csv(#[from] csv::Error),

    #[error("Csv export is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Failed to write xlsx export: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

/// Errors related to internal system invariants and task plumbing.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Background task failed: {0}")]
    TaskJoin(String),

    #[error("System error: {0}")]
    Generic(String),
}

// ================================================================================================
// Boundary error taxonomy
// ================================================================================================

/// Machine-readable error codes surfaced at the service boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DatasetNotFound,
    JobNotFound,
    JobNotReady,
    ExportNotReady,
    ResultReadFailed,
    DatasetObjectMissing,
    ReportDateMismatch,
    FutureDateOutOfRange,
    FutureDateNotSupported,
    RequestValidationError,
    DependencyUnavailable,
    InternalError,
    SyncEndpointRemoved,
}

/// Wire shape of a boundary error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl HerdcastError {
    /// Maps an internal error onto the boundary taxonomy.
    pub fn code(&self) -> ErrorCode {
        use ErrorCode::*;
        match self {
            Self::Data(e) => match e {
                DataError::DatasetNotFound(_) => DatasetNotFound,
                DataError::ReportDateMismatch { .. } => ReportDateMismatch,
                DataError::FutureDateOutOfRange(_) => FutureDateOutOfRange,
                DataError::FutureDateNotMonthStart(_) => FutureDateNotSupported,
                _ => RequestValidationError,
            },
            Self::Job(e) => match e {
                JobError::NotFound(_) => JobNotFound,
                JobError::NotReady(_) => JobNotReady,
                JobError::ExportNotReady(_) => ExportNotReady,
                JobError::ResultReadFailed(_) => ResultReadFailed,
                JobError::QueueClosed => DependencyUnavailable,
                JobError::Canceled(_) => InternalError,
            },
            Self::Storage(e) => match e {
                StorageError::ObjectMissing { .. } => DatasetObjectMissing,
                StorageError::ObjectStore(_) => DependencyUnavailable,
                StorageError::Serialization(_) => InternalError,
            },
            Self::Sim(_) | Self::Export(_) | Self::System(_) => InternalError,
        }
    }

    pub fn api_error(&self) -> ApiError {
        ApiError {
            error_code: self.code(),
            message: self.to_string(),
            details: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_codes_render_screaming_snake() {
        assert_eq!(ErrorCode::DatasetObjectMissing.to_string(), "DATASET_OBJECT_MISSING");
        assert_eq!(ErrorCode::SyncEndpointRemoved.to_string(), "SYNC_ENDPOINT_REMOVED");
    }

    #[test]
    fn validation_errors_map_to_request_validation() {
        let err: HerdcastError = DataError::Validation("mc_runs out of range".into()).into();
        assert_eq!(err.code(), ErrorCode::RequestValidationError);
    }

    #[test]
    fn missing_dataset_object_maps_to_its_code() {
        let err: HerdcastError = StorageError::ObjectMissing {
            bucket: "datasets".into(),
            key: "datasets/abc.csv".into(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::DatasetObjectMissing);
    }
}
