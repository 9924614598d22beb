//! On-disk API description file.
//!
//! The host serves `{dir}/{name}.spec.json` at `/{name}.spec.json`. The file
//! is read on every request so it can be replaced without a restart.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{DocsError, DocsResult};

/// Directory the host looks in by default.
pub const DEFAULT_DOCS_DIR: &str = "swagger";

/// File and route suffix for API descriptions.
pub const SPEC_SUFFIX: &str = ".spec.json";

/// An API description file named after a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecFile {
    dir: PathBuf,
    name: String,
}

impl SpecFile {
    /// Creates a spec file source.
    ///
    /// ```
    /// use twinport_docs::SpecFile;
    ///
    /// let spec = SpecFile::new("swagger", "photos").unwrap();
    /// assert_eq!(spec.route(), "/photos.spec.json");
    /// assert!(SpecFile::new("swagger", "../secrets").is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `DocsError::InvalidDocName` if `name` is empty or contains a
    /// path separator or `..`.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> DocsResult<Self> {
        let name = name.into();
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(DocsError::InvalidDocName { name });
        }
        Ok(Self {
            dir: dir.into(),
            name,
        })
    }

    /// Document name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// HTTP route the file is served on.
    #[must_use]
    pub fn route(&self) -> String {
        format!("/{}{SPEC_SUFFIX}", self.name)
    }

    /// Location of the file on disk.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}{SPEC_SUFFIX}", self.name))
    }

    /// Directory the file lives in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads the file and checks that it is JSON.
    ///
    /// # Errors
    ///
    /// Returns `DocsError::NotFound` if the file is missing,
    /// `DocsError::InvalidJson` if it does not parse.
    pub async fn load(&self) -> DocsResult<Bytes> {
        let path = self.path();
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(DocsError::NotFound { path });
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice::<serde_json::Value>(&content)?;
        Ok(Bytes::from(content))
    }
}
