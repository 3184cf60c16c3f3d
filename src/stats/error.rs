use std::path::PathBuf;

use crate::{container, fsutil};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid time range: since ({since}) must be before before ({before})")]
    InvalidRange { since: i64, before: i64 },
    #[error("time range [{since}, {before}) is too wide")]
    WindowTooWide { since: i64, before: i64 },
    #[error("limit must be greater than zero")]
    InvalidLimit,
    #[error("limit {limit} exceeds the maximum of {max}")]
    LimitTooLarge { limit: usize, max: usize },
    #[error(transparent)]
    FileOpen(#[from] fsutil::FileOpenError),
    #[error("failed to access stats log `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode stat: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to read stats: {0}")]
    ReadError(#[source] sqlx::Error),
    #[error("failed to insert stats: {0}")]
    InsertError(#[source] sqlx::Error),
    #[error("stats task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("invalid stat record: {0}")]
    InvalidRecord(#[from] container::Error),
}

impl Error {
    /// Whether the error was caused by the caller's query options.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Error::InvalidRange { .. }
                | Error::WindowTooWide { .. }
                | Error::InvalidLimit
                | Error::LimitTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
