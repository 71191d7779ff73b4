use std::path::PathBuf;

/// Failures while talking to the LiteLLM metering API.
///
/// Any of these abandons the whole remote pass; the reconciler falls back to
/// the local log scan.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("API key is missing or invalid")]
    MissingCredential,

    #[error("invalid API URL: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error with status code: {0}")]
    Status(u16),

    #[error("invalid API response: {0}")]
    Decode(String),
}

/// Failures of the local log scan.
///
/// Neither is fatal: a malformed record skips one line and an unreadable
/// path skips a file or yields empty aggregates.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("cannot read {}: {source}", path.display())]
    FilesystemUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl UsageError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UsageError::FilesystemUnavailable {
            path: path.into(),
            source,
        }
    }
}
