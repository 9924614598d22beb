//! # Twinport Docs
//!
//! Documentation endpoints mounted by the Twinport host:
//! - [`SpecFile`] - the API description file, served at `/{name}.spec.json`
//! - [`SwaggerUi`] - an interactive viewer for that file, served at `/docs/`
//!
//! ```
//! use twinport_docs::{SpecFile, SwaggerUi, DEFAULT_DOCS_DIR, DEFAULT_UI_PATH};
//!
//! let spec = SpecFile::new(DEFAULT_DOCS_DIR, "photos").unwrap();
//! let ui = SwaggerUi::new(DEFAULT_UI_PATH, spec.route());
//! assert_eq!(ui.spec_url(), "/photos.spec.json");
//! ```

#![warn(missing_docs)]

mod error;
mod spec_file;
mod swagger;

pub use error::{DocsError, DocsResult};
pub use spec_file::{SpecFile, DEFAULT_DOCS_DIR, SPEC_SUFFIX};
pub use swagger::{SwaggerUi, DEFAULT_UI_PATH};
