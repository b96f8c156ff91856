use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CheckerError {
    #[error("invalid or corrupt archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive entry escapes the extraction directory: {0}")]
    UnsafeArchivePath(String),

    #[error("file {0} is missing from the content cache")]
    CacheMiss(String),

    #[error("no dispatch record for job {0}")]
    RecordNotFound(Uuid),

    #[error("backend call failed: {0}")]
    Backend(String),

    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("message bus unavailable: {0}")]
    Bus(String),

    #[error("device bridge error: {0}")]
    Device(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),
}

pub type Result<T> = std::result::Result<T, CheckerError>;
