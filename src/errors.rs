use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Jira answered with something other than 200. Status and body are kept as received.
    #[error("Request to {url} failed with status {status}: {body}")]
    Request {
        url: String,
        status: u16,
        body: String,
    },

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unable to upload to s3 [{bucket}/{key}]: {source}")]
    Storage {
        bucket: String,
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("No backup task id returned by {url}")]
    NoTaskId { url: String },

    #[error("Backup task {task_id} still incomplete after {attempts} progress checks")]
    PollLimitExceeded { task_id: String, attempts: u32 },
}

impl BackupError {
    /// HTTP status carried by a `Request` error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackupError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
