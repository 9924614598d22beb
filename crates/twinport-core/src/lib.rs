//! # Twinport Core
//!
//! Core types shared by every Twinport crate:
//!
//! - [`DomainError`] - Business error taxonomy used by service handlers
//! - [`status`] - Deterministic mapping from [`DomainError`] to gRPC status
//! - [`MethodDescriptorMap`] - Static short-name method table for interceptors
//! - [`RequestContext`] - Typed per-call context carried in request extensions

#![doc(html_root_url = "https://docs.rs/twinport-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
pub mod method;
pub mod status;

pub use context::{RequestContext, RequestId, REQUEST_ID_HEADER};
pub use error::{
    find_domain_error, is_not_found, kind_of, BoxError, DefaultTranslator, DomainError,
    DomainResult, ErrorDetail, ErrorKind, FieldFailure, FieldViolation, Translator,
};
pub use method::{MethodDescriptorMap, MethodError};
