use thiserror::Error;

/// Application-wide result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types.
#[derive(Debug, Error)]
pub enum AppError {
    /// I/O errors from the archive file or content handles.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive container could not be read.
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Output could not be serialized.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A node passed to an insert or replace is already parented,
    /// or was detached from a previous parent.
    #[error("Invalid node: {0}")]
    InvalidNode(String),

    /// A collection was mutated while one of its change events was being dispatched.
    #[error("Collection mutated during change notification")]
    Reentrancy,

    /// A child index outside the collection bounds.
    #[error("Index {index} out of range for {len} children")]
    IndexOutOfRange { index: usize, len: usize },

    /// Entry enumeration or container parsing failed while building a subtree.
    #[error("Failed to build {name}: {reason}")]
    ConstructionFailure { name: String, reason: String },

    /// A leaf could not produce a readable handle.
    #[error("Content unavailable for {path}: {reason}")]
    ContentUnavailable { path: String, reason: String },

    /// No node exists at the requested relative path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid path provided by the user.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The background event channel was closed before a result arrived.
    #[error("Event channel closed")]
    ChannelClosed,
}

impl AppError {
    /// Wrap any error raised while building `name` as a construction failure.
    pub fn construction(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        AppError::ConstructionFailure {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
        assert!(app_err.to_string().contains("file not found"));
    }

    #[test]
    fn invalid_node_display() {
        let err = AppError::InvalidNode("c.txt already has a parent".into());
        assert_eq!(err.to_string(), "Invalid node: c.txt already has a parent");
    }

    #[test]
    fn construction_failure_display() {
        let err = AppError::construction("data.p4k", "truncated central directory");
        assert_eq!(
            err.to_string(),
            "Failed to build data.p4k: truncated central directory"
        );
    }

    #[test]
    fn invalid_path_error_display() {
        let err = AppError::InvalidPath("/nonexistent".into());
        assert_eq!(err.to_string(), "Invalid path: /nonexistent");
    }
}
