use thiserror::Error;

use crate::state_machine::JobId;

#[derive(Debug, Error)]
pub enum StemsplitError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Duplicate job id: {0}")]
    DuplicateJobId(JobId),

    /// The separation engine could not be launched, exited with failure, or
    /// its results could not be collected.
    #[error("{0}")]
    Process(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StemsplitError {
    /// Returns true for errors that describe a missing job rather than a fault.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StemsplitError::JobNotFound(_))
    }
}
