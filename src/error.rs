use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid job submission: {0}")]
    InvalidJob(String),

    #[error("Job queue is at capacity ({0} jobs)")]
    QueueFull(usize),

    /// The lottery walked every candidate without picking one. This is a bug
    /// in weight accounting, never a client error.
    #[error("Lottery selected no job (total weight {total_weight}, draw {draw})")]
    SelectionInvariant { total_weight: f64, draw: f64 },

    /// A secondary index refers to a job the primary store does not hold.
    #[error("Job index inconsistent: {0}")]
    IndexInconsistent(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// True for failures caused by the caller's input, which leave the
    /// queue untouched and can be retried with a corrected request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BrokerError::DuplicateJob(_)
                | BrokerError::JobNotFound(_)
                | BrokerError::InvalidJob(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
