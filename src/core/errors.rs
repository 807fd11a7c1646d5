use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storage error: {message}")]
    Storage {
        status: Option<u16>,
        message: String,
    },

    #[error("Document store error: {0}")]
    Document(String),

    #[error("Media probe error: {0}")]
    Probe(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Scheduler shutdown")]
    ManagerShutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    pub fn storage_error(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Storage {
            status,
            message: message.into(),
        }
    }

    pub fn document_error(message: impl Into<String>) -> Self {
        Self::Document(message.into())
    }

    pub fn probe_error(message: impl Into<String>) -> Self {
        Self::Probe(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 对象存储返回 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage { status: Some(404), .. })
    }
}

/// Error alias
pub type Result<T, E = MediaError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(MediaError::storage_error(Some(404), "missing").is_not_found());
        assert!(!MediaError::storage_error(Some(403), "denied").is_not_found());
        assert!(!MediaError::storage_error(None, "network").is_not_found());
        assert!(!MediaError::internal_error("boom").is_not_found());
    }

    #[test]
    fn test_error_messages_are_readable() {
        let err = MediaError::storage_error(Some(500), "upload failed with status 500");
        assert_eq!(err.to_string(), "Storage error: upload failed with status 500");
        assert_eq!(MediaError::ManagerShutdown.to_string(), "Scheduler shutdown");
    }
}
