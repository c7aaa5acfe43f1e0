use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Malformed configuration document '{document}': {message}")]
    ConfigParse { document: String, message: String },

    #[error("Actuation failed: {0}")]
    Actuation(String),

    #[error("Job already registered: {0}")]
    DuplicateJob(String),

    #[error("Unknown cluster: {0}")]
    UnknownCluster(String),

    #[error("Interval invariant violated: {0}")]
    InvariantViolation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SchedError>;
