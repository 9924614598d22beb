//! Mapping from [`DomainError`] to gRPC [`Status`].
//!
//! | Kind | Code |
//! |---|---|
//! | `InvalidInput` | `InvalidArgument` |
//! | `NotFound` | `NotFound` |
//! | `Conflict` | `AlreadyExists` |
//! | `FailedPrecondition` | `FailedPrecondition` |
//! | `PermissionDenied` | `PermissionDenied` |
//! | `Runtime` | `Internal` |
//!
//! The [`ErrorDetail`] is JSON-encoded into the status details, which tonic
//! sends as the `grpc-status-details-bin` trailer.
//!
//! # Example
//!
//! ```
//! use twinport_core::{status, DomainError};
//! use tonic::Code;
//!
//! let st = status::to_status(&DomainError::conflict("album exists"));
//! assert_eq!(st.code(), Code::AlreadyExists);
//! assert_eq!(st.message(), "album exists");
//!
//! let detail = status::decode_detail(&st).unwrap();
//! assert_eq!(detail.description, "Conflict");
//! ```

use std::error::Error as StdError;

use bytes::Bytes;
use thiserror::Error;
use tonic::{Code, Status};

use crate::error::{find_domain_error, DomainError, ErrorDetail, ErrorKind};

/// Largest encoded detail accepted by [`JsonDetailEncoder`].
pub const MAX_DETAIL_BYTES: usize = 8 * 1024;

/// Message used when a non-domain error reaches the boundary.
pub const INTERNAL_MESSAGE: &str = "internal error";

/// Failure to attach an [`ErrorDetail`] to a status.
#[derive(Debug, Error)]
pub enum DetailError {
    /// Serialization failed.
    #[error("failed to encode error detail: {0}")]
    Encode(#[from] serde_json::Error),

    /// The encoded payload exceeded the limit.
    #[error("error detail is {size} bytes, limit is {limit}")]
    TooLarge {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
}

/// Encodes an [`ErrorDetail`] into status detail bytes.
pub trait DetailEncoder: Send + Sync {
    /// Encodes the detail.
    fn encode(&self, detail: &ErrorDetail) -> Result<Bytes, DetailError>;
}

/// JSON encoder with a size limit.
#[derive(Debug, Clone, Copy)]
pub struct JsonDetailEncoder {
    limit: usize,
}

impl JsonDetailEncoder {
    /// Creates an encoder that rejects payloads larger than `limit` bytes.
    #[must_use]
    pub const fn with_limit(limit: usize) -> Self {
        Self { limit }
    }
}

impl Default for JsonDetailEncoder {
    fn default() -> Self {
        Self::with_limit(MAX_DETAIL_BYTES)
    }
}

impl DetailEncoder for JsonDetailEncoder {
    fn encode(&self, detail: &ErrorDetail) -> Result<Bytes, DetailError> {
        let bytes = serde_json::to_vec(detail)?;
        if bytes.len() > self.limit {
            return Err(DetailError::TooLarge {
                size: bytes.len(),
                limit: self.limit,
            });
        }
        Ok(Bytes::from(bytes))
    }
}

/// Returns the gRPC code for an error kind.
#[must_use]
pub const fn code_for(kind: ErrorKind) -> Code {
    match kind {
        ErrorKind::InvalidInput => Code::InvalidArgument,
        ErrorKind::NotFound => Code::NotFound,
        ErrorKind::Conflict => Code::AlreadyExists,
        ErrorKind::FailedPrecondition => Code::FailedPrecondition,
        ErrorKind::PermissionDenied => Code::PermissionDenied,
        ErrorKind::Runtime => Code::Internal,
    }
}

/// Converts a domain error into a status using the default encoder.
#[must_use]
pub fn to_status(err: &DomainError) -> Status {
    to_status_with(err, &JsonDetailEncoder::default())
}

/// Converts a domain error into a status using `encoder` for the detail.
#[must_use]
pub fn to_status_with<E>(err: &DomainError, encoder: &E) -> Status
where
    E: DetailEncoder + ?Sized,
{
    response_status(code_for(err.kind()), err.to_string(), err.detail(), encoder)
}

/// Builds a status with `detail` attached.
///
/// If the detail cannot be encoded, a bare `Internal` status is returned
/// whose message names both the attachment failure and `message`. A minimal
/// detail carrying `message` as its description is attached when possible.
pub fn response_status<E>(
    code: Code,
    message: impl Into<String>,
    detail: &ErrorDetail,
    encoder: &E,
) -> Status
where
    E: DetailEncoder + ?Sized,
{
    let message = message.into();
    match encoder.encode(detail) {
        Ok(bytes) => Status::with_details(code, message, bytes),
        Err(attach) => {
            tracing::warn!(
                code = ?code,
                error = %attach,
                "failed to attach error detail"
            );
            let fallback_message = format!("{attach}; original error: {message}");
            match serde_json::to_vec(&ErrorDetail::new(message)) {
                Ok(bytes) if bytes.len() <= MAX_DETAIL_BYTES => {
                    Status::with_details(Code::Internal, fallback_message, Bytes::from(bytes))
                }
                _ => Status::internal(fallback_message),
            }
        }
    }
}

/// Maps any error reaching the transport boundary.
///
/// The first [`DomainError`] in the source chain decides the status. Any
/// other error becomes a generic `Internal` status without its message.
#[must_use]
pub fn status_from_error(err: &(dyn StdError + 'static)) -> Status {
    match find_domain_error(err) {
        Some(domain) => to_status(domain),
        None => {
            tracing::error!(error = %err, "unclassified error reached the transport boundary");
            Status::internal(INTERNAL_MESSAGE)
        }
    }
}

/// `Unauthenticated` status for interceptors that reject a caller.
#[must_use]
pub fn unauthenticated(message: impl Into<String>) -> Status {
    response_status(
        Code::Unauthenticated,
        message,
        &ErrorDetail::new("Unauthenticated"),
        &JsonDetailEncoder::default(),
    )
}

/// `ResourceExhausted` status for rate-limiting interceptors.
#[must_use]
pub fn too_many_requests(message: impl Into<String>) -> Status {
    response_status(
        Code::ResourceExhausted,
        message,
        &ErrorDetail::new("Too many requests"),
        &JsonDetailEncoder::default(),
    )
}

/// Decodes the [`ErrorDetail`] attached to a status, if any.
#[must_use]
pub fn decode_detail(status: &Status) -> Option<ErrorDetail> {
    let details = status.details();
    if details.is_empty() {
        return None;
    }
    serde_json::from_slice(details).ok()
}

impl From<DomainError> for Status {
    fn from(err: DomainError) -> Self {
        to_status(&err)
    }
}
