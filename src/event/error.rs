use std::path::PathBuf;
use std::time::Duration;

/// Failure of a single transport run. Only that transport's delivery of the
/// event is abandoned.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn transport `{name}` ({path}): {source}")]
    Spawn {
        name: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("transport `{name}` exited with {status}: {stderr}")]
    Exit {
        name: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("transport `{name}` did not finish within {timeout:?}")]
    Timeout { name: String, timeout: Duration },
}
