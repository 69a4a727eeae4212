use std::num::ParseIntError;

use thiserror::Error;

/// Errors raised by the auto-annotation subsystem.
///
/// `Configuration` and `FrameIndex` abort a request before any job is
/// queued; `UnsupportedHardware` is fatal to the job that hit it;
/// `AlreadyRunning`/`NotRunning` are lifecycle precondition violations
/// rejected synchronously. `Inference` is only ever observed through the
/// `failed` job status - it is caught inside the worker and never re-raised.
#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration error: cannot parse frame index from {path}: {source}")]
    FrameIndex {
        path: String,
        #[source]
        source: ParseIntError,
    },

    #[error("No compatible acceleration path: {0}")]
    UnsupportedHardware(String),

    #[error("No labels found for auto annotation")]
    NoLabelsMatched,

    #[error("Annotation process for task {0} is already running")]
    AlreadyRunning(i64),

    #[error("Task {0} is not being annotated currently")]
    NotRunning(i64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Inference failure: {0}")]
    Inference(String),
}

pub type Result<T> = std::result::Result<T, AnnotationError>;

impl From<sled::Error> for AnnotationError {
    fn from(err: sled::Error) -> Self {
        AnnotationError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AnnotationError {
    fn from(err: serde_json::Error) -> Self {
        AnnotationError::Storage(err.to_string())
    }
}
