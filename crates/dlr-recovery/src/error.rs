use dlr_core::FileStateError;
use dlr_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file state error: {0}")]
    FileState(#[from] FileStateError),
    #[error("holding area {area} unreadable: {message}")]
    Source { area: String, message: String },
    #[error("sink write failed in chunk {chunk}: {message}")]
    SinkWrite { chunk: usize, message: String },
    #[error("backlog exceeded in {area}: {count} records against ceiling {ceiling}")]
    BacklogExceeded {
        area: String,
        count: usize,
        ceiling: usize,
    },
    #[error("job {job} is already running (lock held at {})", path.display())]
    RunInProgress { job: String, path: PathBuf },
    #[error("run {run_id} of job {job} already completed")]
    RunAlreadyCompleted { job: String, run_id: String },
    #[error("unknown job: {0}")]
    UnknownJob(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl RecoveryError {
    pub(crate) fn unreadable(area: impl Into<String>, err: impl std::fmt::Display) -> Self {
        RecoveryError::Source {
            area: area.into(),
            message: err.to_string(),
        }
    }
}
