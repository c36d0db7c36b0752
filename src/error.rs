use thiserror::Error;

/// Failures surfaced by the grading pipeline and the result store.
///
/// A low-confidence prediction is not an error; it is reported as
/// [`Interpretation::Rejected`](crate::classification::Interpretation::Rejected).
#[derive(Error, Debug)]
pub enum GraderError {
    #[error("Cannot decode image: {0}")]
    Decode(String),
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Invalid taxonomy: {0}")]
    Taxonomy(String),
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Record cannot be stored: {0}")]
    InvalidRecord(String),
    #[error("Stored record is malformed: {0}")]
    CorruptRecord(String),
    #[error("No classification result with id {0}")]
    NotFound(i64),
    #[error("Classification result {0} already has an image path")]
    ImagePathAlreadySet(i64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Classifier worker has stopped")]
    WorkerStopped,
}

pub type Result<T> = std::result::Result<T, GraderError>;
