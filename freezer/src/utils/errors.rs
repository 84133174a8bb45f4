//! Error types for the freezer.

use std::fmt::Display;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FreezerError {
    #[error("Invalid path \"{path}\": {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Archive error ({context}): {message}")]
    Archive { context: String, message: String },

    #[error("Store error for \"{context}\": {message}")]
    Store { context: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Payload codec error: {0}")]
    Codec(String),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FreezerError {
    pub fn invalid_path(path: &Path, reason: impl Into<String>) -> Self {
        FreezerError::InvalidPath {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn archive(context: impl Display, err: impl Display) -> Self {
        FreezerError::Archive {
            context: context.to_string(),
            message: err.to_string(),
        }
    }

    /// `context` is the storage id where there is one, else the database
    pub fn store(context: impl Display, err: impl Display) -> Self {
        FreezerError::Store {
            context: context.to_string(),
            message: err.to_string(),
        }
    }

    /// True for database failures, as opposed to local filesystem ones.
    pub fn is_store_error(&self) -> bool {
        matches!(self, FreezerError::Store { .. })
    }
}

pub type Result<T> = std::result::Result<T, FreezerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_carries_storage_id() {
        let err = FreezerError::store("s1", "no such table: persist");
        assert!(err.is_store_error());
        assert_eq!(
            err.to_string(),
            "Store error for \"s1\": no such table: persist"
        );
    }

    #[test]
    fn test_invalid_path_message() {
        let err = FreezerError::invalid_path(Path::new("/nope"), "does not exist");
        assert!(!err.is_store_error());
        assert_eq!(err.to_string(), "Invalid path \"/nope\": does not exist");
    }
}
