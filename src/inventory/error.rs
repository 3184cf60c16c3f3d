use crate::{container, fsutil};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("probe `{0}` not found")]
    ProbeNotFound(String),
    #[error("container `{0}` not found")]
    ContainerNotFound(String),
    #[error("container `{id}` already exists on probe `{probe}`")]
    AlreadyExists { probe: String, id: String },
    #[error(transparent)]
    FileOpen(#[from] fsutil::FileOpenError),
    #[error(transparent)]
    FileWrite(#[from] fsutil::FileWriteError),
    #[error("failed to decode container registry `{path}`: {source}")]
    Decode {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode container registry: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to read database entry: {0}")]
    ReadError(#[source] sqlx::Error),
    #[error("failed to write database entry: {0}")]
    WriteError(#[source] sqlx::Error),
    #[error("inventory task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("invalid container record: {0}")]
    InvalidRecord(#[from] container::Error),
}

impl Error {
    /// `NotFound` is a normal outcome and must not be reported as a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ProbeNotFound(_) | Error::ContainerNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
