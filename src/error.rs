use thiserror::Error;

/// Failure of a single fetch from a remote feed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected http status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Network(_) => "network",
            FetchError::Status(_) => "status",
            FetchError::Malformed(_) => "malformed",
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored value under {key:?} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid value {value:?} for setting {key:?}")]
    InvalidValue { key: String, value: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker name is empty")]
    EmptyName,
    #[error("invalid worker url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode export: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kind() {
        assert_eq!(FetchError::Status(503).kind(), "status");
        assert_eq!(FetchError::Malformed("x".into()).kind(), "malformed");
    }

    #[test]
    fn test_json_error_is_malformed() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let fetch: FetchError = err.into();
        assert!(matches!(fetch, FetchError::Malformed(_)));
    }
}
