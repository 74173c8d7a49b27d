//! Error types for the codemap pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for codemap operations.
#[derive(Debug, Error)]
pub enum CodemapError {
    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Archive error: {message}")]
    Archive {
        message: String,
        #[source]
        source: Option<zip::result::ZipError>,
    },

    // Source-format errors (file present but unparsable)
    #[error("Parse error in {path:?}: {message}")]
    Parse {
        message: String,
        path: Option<PathBuf>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Pipeline control errors
    #[error("Validation failed for {failed} source(s)")]
    ValidationFailed { failed: usize },

    #[error("{component} failed: {message}")]
    ComponentFailed { component: String, message: String },

    #[error("Unknown pipeline key: {0}")]
    UnknownKey(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Run cancelled")]
    Cancelled,
}

/// Result type alias for codemap operations.
pub type Result<T> = std::result::Result<T, CodemapError>;

impl From<rusqlite::Error> for CodemapError {
    fn from(err: rusqlite::Error) -> Self {
        CodemapError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<std::io::Error> for CodemapError {
    fn from(err: std::io::Error) -> Self {
        CodemapError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<zip::result::ZipError> for CodemapError {
    fn from(err: zip::result::ZipError) -> Self {
        CodemapError::Archive {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CodemapError {
    fn from(err: serde_json::Error) -> Self {
        CodemapError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl CodemapError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CodemapError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a parse error with path context.
    pub fn parse(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        CodemapError::Parse {
            message: message.into(),
            path: Some(path.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CodemapError::UnknownKey("foo".into());
        assert_eq!(err.to_string(), "Unknown pipeline key: foo");

        let err = CodemapError::ValidationFailed { failed: 3 };
        assert_eq!(err.to_string(), "Validation failed for 3 source(s)");
    }
}
