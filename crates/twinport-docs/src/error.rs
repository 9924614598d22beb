//! Error types for the documentation crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while serving documentation.
#[derive(Debug, Error)]
pub enum DocsError {
    /// The document name would escape the docs directory.
    #[error("Invalid document name: {name:?}")]
    InvalidDocName {
        /// The rejected name.
        name: String,
    },

    /// The description file does not exist.
    #[error("API description not found: {}", path.display())]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The description file is not valid JSON.
    #[error("API description is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// IO error when reading the file.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for documentation operations.
pub type DocsResult<T> = Result<T, DocsError>;
