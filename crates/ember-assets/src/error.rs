//! Error types for the asset system.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during asset operations.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The requested asset or file was not found.
    #[error("Asset not found: {path}")]
    NotFound { path: String },

    /// Failed to read asset data from disk.
    #[error("IO error loading '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No loader found for the given file extension.
    #[error("No loader registered for extension: .{extension}")]
    NoLoaderForExtension { extension: String },

    /// The loader failed to parse or build the asset.
    #[error("Failed to load '{path}': {message}")]
    LoaderError { path: String, message: String },

    /// A payload or handle did not match the record's type tag.
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The handle has no live target record.
    #[error("Invalid asset handle: {reason}")]
    InvalidHandle { reason: String },

    /// An API was used outside of its contract.
    #[error("Asset usage error: {message}")]
    Usage { message: String },

    /// A record cannot be unregistered while handles still reference it.
    #[error("Asset '{name}' is still referenced by {count} handle(s)")]
    StillReferenced { name: String, count: u32 },

    /// The owning server is being torn down.
    #[error("Asset server is shutting down")]
    ShuttingDown,

    /// Generic error with a message.
    #[error("Asset error: {message}")]
    Other { message: String },
}

impl AssetError {
    /// Shorthand for [`AssetError::LoaderError`].
    pub fn loader(path: impl ToString, message: impl Into<String>) -> Self {
        AssetError::LoaderError {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for [`AssetError::Usage`].
    pub fn usage(message: impl Into<String>) -> Self {
        AssetError::Usage {
            message: message.into(),
        }
    }

    /// Returns `true` for missing-resource errors, which only abort the task
    /// that hit them.
    pub fn is_missing_resource(&self) -> bool {
        matches!(
            self,
            AssetError::NotFound { .. } | AssetError::NoLoaderForExtension { .. }
        )
    }
}

/// Result type alias for asset operations.
pub type AssetResult<T> = Result<T, AssetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = AssetError::NoLoaderForExtension {
            extension: "mesh".into(),
        };
        assert_eq!(err.to_string(), "No loader registered for extension: .mesh");

        let err = AssetError::loader("models/cube.mesh", "bad header");
        assert_eq!(err.to_string(), "Failed to load 'models/cube.mesh': bad header");
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as _;

        let err = AssetError::Io {
            path: PathBuf::from("a.bin"),
            source: std::io::Error::other("disk on fire"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("a.bin"));
    }

    #[test]
    fn test_missing_resource_classification() {
        assert!(AssetError::NotFound { path: "x".into() }.is_missing_resource());
        assert!(!AssetError::ShuttingDown.is_missing_resource());
    }
}
