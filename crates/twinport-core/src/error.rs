//! Domain error taxonomy.
//!
//! Every service handler hosted by Twinport signals failure with a
//! [`DomainError`]. The error carries:
//!
//! - a closed [`ErrorKind`] that the wire mapper turns into a gRPC code
//! - a cause chain that keeps the formatted message and any wrapped error
//! - an [`ErrorDetail`] with a fixed description and ordered field violations
//!
//! # Description policy
//!
//! `detail.description` is always a fixed label per kind (or, for form
//! validation, a label naming the form). The formatted message only lives in
//! the cause chain, so clients can translate descriptions without parsing
//! free text.
//!
//! # Example
//!
//! ```
//! use twinport_core::{domain_err, is_not_found, DomainError, ErrorKind};
//!
//! let err = domain_err!(NotFound, "user {} not found", "bob");
//! assert_eq!(err.to_string(), "user bob not found");
//! assert_eq!(err.kind(), ErrorKind::NotFound);
//! assert!(is_not_found(&err));
//! ```

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed error used as the cause of a [`DomainError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type alias using [`DomainError`].
pub type DomainResult<T> = Result<T, DomainError>;

/// The closed set of business failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The caller sent data that failed validation.
    InvalidInput,
    /// An unexpected failure while processing the request.
    Runtime,
    /// The requested entity does not exist.
    NotFound,
    /// The entity already exists or conflicts with existing state.
    Conflict,
    /// The system is not in a state where the operation can run.
    FailedPrecondition,
    /// The caller is not allowed to perform the operation.
    PermissionDenied,
}

impl ErrorKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::InvalidInput,
        Self::Runtime,
        Self::NotFound,
        Self::Conflict,
        Self::FailedPrecondition,
        Self::PermissionDenied,
    ];

    /// Returns the fixed description label used in [`ErrorDetail`].
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::InvalidInput => "Invalid input",
            Self::Runtime => "Runtime error",
            Self::NotFound => "Not found",
            Self::Conflict => "Conflict",
            Self::FailedPrecondition => "Failed precondition",
            Self::PermissionDenied => "Permission denied",
        }
    }

    /// Returns a machine-readable name for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Runtime => "runtime",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::FailedPrecondition => "failed_precondition",
            Self::PermissionDenied => "permission_denied",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field-level validation failure reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Name of the offending field.
    pub field: String,
    /// Human-readable (already translated) message.
    pub message: String,
}

impl FieldViolation {
    /// Creates a new field violation.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Structured, machine-readable failure detail.
///
/// This is the payload attached to every failed RPC status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Short, translation-friendly description of the failure.
    pub description: String,
    /// Field violations, in the order they were reported.
    #[serde(default)]
    pub violations: Vec<FieldViolation>,
}

impl ErrorDetail {
    /// Creates a detail with a description and no violations.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            violations: Vec::new(),
        }
    }

    /// Returns `true` if there are no field violations.
    #[must_use]
    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// Plain message cause used by the formatting constructors.
#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

/// Cause that prefixes a wrapped error with context.
#[derive(Debug, Error)]
#[error("{context}: {source}")]
struct Contextual {
    context: String,
    #[source]
    source: BoxError,
}

/// A business-level failure raised by a service handler.
///
/// Constructed through one of the per-kind constructors and never mutated
/// afterwards. The wire mapper consumes it at the transport boundary.
#[derive(Debug)]
pub struct DomainError {
    kind: ErrorKind,
    cause: Option<BoxError>,
    detail: ErrorDetail,
}

impl DomainError {
    /// Creates an error of the given kind without a cause.
    ///
    /// Its message is the empty string.
    #[must_use]
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            cause: None,
            detail: ErrorDetail::new(kind.description()),
        }
    }

    /// Creates an error of the given kind with a formatted message.
    #[must_use]
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            cause: Some(Box::new(Message(message.into()))),
            detail: ErrorDetail::new(kind.description()),
        }
    }

    /// Invalid input data.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::with_message(ErrorKind::InvalidInput, message)
    }

    /// Entity not found.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_message(ErrorKind::NotFound, message)
    }

    /// Conflict with existing state.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::with_message(ErrorKind::Conflict, message)
    }

    /// Operation rejected because a precondition does not hold.
    #[must_use]
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::with_message(ErrorKind::FailedPrecondition, message)
    }

    /// Caller lacks permission.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::with_message(ErrorKind::PermissionDenied, message)
    }

    /// Wraps an unexpected failure, prefixing it with `context`.
    ///
    /// The message becomes `"{context}: {cause}"` and the original error
    /// stays reachable through [`std::error::Error::source`].
    ///
    /// ```
    /// use twinport_core::DomainError;
    ///
    /// let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
    /// let err = DomainError::runtime(io, "SaveAvatar");
    /// assert_eq!(err.to_string(), "SaveAvatar: disk full");
    /// ```
    pub fn runtime(cause: impl Into<BoxError>, context: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            cause: Some(Box::new(Contextual {
                context: context.into(),
                source: cause.into(),
            })),
            detail: ErrorDetail::new(ErrorKind::Runtime.description()),
        }
    }

    /// Builds an [`ErrorKind::InvalidInput`] error from form validation failures.
    ///
    /// Each failure becomes a [`FieldViolation`] whose message is produced by
    /// `translator`; the supplied order is preserved.
    pub fn validation<T, I>(translator: &T, failures: I, form_name: &str) -> Self
    where
        T: Translator + ?Sized,
        I: IntoIterator<Item = FieldFailure>,
    {
        let violations: Vec<FieldViolation> = failures
            .into_iter()
            .map(|failure| FieldViolation::new(failure.field.clone(), translator.translate(&failure)))
            .collect();

        let fields = violations
            .iter()
            .map(|v| v.field.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            kind: ErrorKind::InvalidInput,
            cause: Some(Box::new(Message(format!(
                "{form_name}: invalid fields [{fields}]"
            )))),
            detail: ErrorDetail {
                description: format!("Form data validation error {form_name}"),
                violations,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the structured detail.
    #[must_use]
    pub const fn detail(&self) -> &ErrorDetail {
        &self.detail
    }

    /// Returns `true` if this error is of the given kind.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Returns the message of a possibly absent error.
    ///
    /// An absent error, or one without a cause, yields `""`.
    ///
    /// ```
    /// use twinport_core::DomainError;
    ///
    /// assert_eq!(DomainError::message_of(None), "");
    /// ```
    #[must_use]
    pub fn message_of(err: Option<&Self>) -> String {
        err.map(ToString::to_string).unwrap_or_default()
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => fmt::Display::fmt(cause, f),
            None => Ok(()),
        }
    }
}

impl StdError for DomainError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Creates a [`DomainError`] of the named kind from a format string.
///
/// ```
/// use twinport_core::{domain_err, ErrorKind};
///
/// let err = domain_err!(Conflict, "album {} already exists", 7);
/// assert_eq!(err.kind(), ErrorKind::Conflict);
/// assert_eq!(err.to_string(), "album 7 already exists");
/// ```
#[macro_export]
macro_rules! domain_err {
    ($kind:ident, $($arg:tt)+) => {
        $crate::DomainError::with_message($crate::ErrorKind::$kind, format!($($arg)+))
    };
}

/// Returns the first [`DomainError`] found in the error's source chain.
#[must_use]
pub fn find_domain_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a DomainError> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(domain) = e.downcast_ref::<DomainError>() {
            return Some(domain);
        }
        current = e.source();
    }
    None
}

/// Returns the kind of the first [`DomainError`] in the chain, if any.
#[must_use]
pub fn kind_of(err: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    find_domain_error(err).map(DomainError::kind)
}

/// Returns `true` if any link of the chain is a not-found [`DomainError`].
#[must_use]
pub fn is_not_found(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e
            .downcast_ref::<DomainError>()
            .is_some_and(|d| d.kind == ErrorKind::NotFound)
        {
            return true;
        }
        current = e.source();
    }
    false
}

/// A raw field-level validation failure, before translation.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFailure {
    /// Field name.
    pub field: String,
    /// Validation rule that failed (e.g. `"required"`, `"email"`).
    pub code: String,
    /// Optional message supplied by the validator.
    pub message: Option<String>,
    /// Rule parameters (e.g. `min`, `max`).
    pub params: BTreeMap<String, serde_json::Value>,
}

impl FieldFailure {
    /// Creates a failure for `field` that broke rule `code`.
    #[must_use]
    pub fn new(field: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: None,
            params: BTreeMap::new(),
        }
    }

    /// Attaches a validator-supplied message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches a rule parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Flattens `validator` errors into failures, ordered by field name.
    ///
    /// Nested struct and list errors are not descended into.
    #[must_use]
    pub fn from_validation_errors(errors: &validator::ValidationErrors) -> Vec<Self> {
        let mut fields: Vec<(String, &Vec<validator::ValidationError>)> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| (field.to_string(), errs))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));

        fields
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |err| Self {
                    field: field.clone(),
                    code: err.code.to_string(),
                    message: err.message.as_ref().map(ToString::to_string),
                    params: err
                        .params
                        .iter()
                        .filter(|(name, _)| name.as_ref() != "value")
                        .map(|(name, value)| (name.to_string(), value.clone()))
                        .collect(),
                })
            })
            .collect()
    }
}

/// Turns a [`FieldFailure`] into a client-facing message.
pub trait Translator {
    /// Produces the translated message for one failure.
    fn translate(&self, failure: &FieldFailure) -> String;
}

impl<F> Translator for F
where
    F: Fn(&FieldFailure) -> String,
{
    fn translate(&self, failure: &FieldFailure) -> String {
        self(failure)
    }
}

/// Translator that uses the validator message, falling back to the rule code.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTranslator;

impl Translator for DefaultTranslator {
    fn translate(&self, failure: &FieldFailure) -> String {
        failure
            .message
            .clone()
            .unwrap_or_else(|| failure.code.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("loading profile")]
    struct Wrapper {
        #[source]
        source: DomainError,
    }

    fn all_constructors() -> Vec<(ErrorKind, DomainError)> {
        vec![
            (ErrorKind::InvalidInput, DomainError::invalid_input("bad")),
            (
                ErrorKind::Runtime,
                DomainError::runtime(std::io::Error::other("boom"), "Load"),
            ),
            (ErrorKind::NotFound, DomainError::not_found("missing")),
            (ErrorKind::Conflict, DomainError::conflict("dup")),
            (
                ErrorKind::FailedPrecondition,
                DomainError::failed_precondition("not ready"),
            ),
            (
                ErrorKind::PermissionDenied,
                DomainError::permission_denied("nope"),
            ),
        ]
    }

    #[test]
    fn test_constructor_kinds() {
        for (kind, err) in all_constructors() {
            assert_eq!(err.kind(), kind);
            assert_eq!(err.detail().description, kind.description());
            assert_eq!(is_not_found(&err), kind == ErrorKind::NotFound);
        }
    }

    #[test]
    fn test_is_not_found_through_wrapping() {
        for (kind, err) in all_constructors() {
            let wrapped = Wrapper { source: err };
            assert_eq!(is_not_found(&wrapped), kind == ErrorKind::NotFound);
            assert_eq!(kind_of(&wrapped), Some(kind));
        }
    }

    #[test]
    fn test_is_not_found_through_anyhow_context() {
        let err = anyhow::Error::new(DomainError::not_found("photo 3 not found"))
            .context("rendering album")
            .context("handling request");
        assert!(is_not_found(err.as_ref()));

        let other = anyhow::anyhow!("plain failure").context("handling request");
        assert!(!is_not_found(other.as_ref()));
    }

    #[test]
    fn test_is_not_found_deep_runtime_chain() {
        let inner = DomainError::not_found("user 1 not found");
        let outer = DomainError::runtime(inner, "GetUser");
        // The outer link is a runtime error, but an inner link is not-found.
        assert_eq!(outer.kind(), ErrorKind::Runtime);
        assert!(is_not_found(&outer));
        assert_eq!(kind_of(&outer), Some(ErrorKind::Runtime));
    }

    #[test]
    fn test_message_of_absent_is_empty() {
        assert_eq!(DomainError::message_of(None), "");
        for kind in ErrorKind::ALL {
            let err = DomainError::from_kind(kind);
            assert_eq!(err.to_string(), "");
            assert_eq!(DomainError::message_of(Some(&err)), "");
        }
    }

    #[test]
    fn test_formatted_not_found() {
        let err = domain_err!(NotFound, "user {} not found", "bob");
        assert_eq!(err.to_string(), "user bob not found");
        assert!(is_not_found(&err));
        // The formatted message is not duplicated into the description.
        assert_eq!(err.detail().description, "Not found");
    }

    #[test]
    fn test_runtime_keeps_source() {
        let err = DomainError::runtime(std::io::Error::other("disk full"), "SaveAvatar");
        assert_eq!(err.to_string(), "SaveAvatar: disk full");

        let context = err.source().expect("context link");
        let io = context.source().expect("io link");
        assert_eq!(io.to_string(), "disk full");
        assert!(io.downcast_ref::<std::io::Error>().is_some());
    }

    #[test]
    fn test_validation_preserves_order() {
        let failures = vec![
            FieldFailure::new("email", "required"),
            FieldFailure::new("age", "range").with_message("must be positive"),
        ];
        let err = DomainError::validation(&DefaultTranslator, failures, "SignUpForm");

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(
            err.detail().violations,
            vec![
                FieldViolation::new("email", "required"),
                FieldViolation::new("age", "must be positive"),
            ]
        );
        assert_eq!(
            err.detail().description,
            "Form data validation error SignUpForm"
        );
        assert!(err.to_string().starts_with("SignUpForm:"));
    }

    #[test]
    fn test_validation_with_closure_translator() {
        let translate = |f: &FieldFailure| format!("{} failed {}", f.field, f.code);
        let err = DomainError::validation(
            &translate,
            [FieldFailure::new("name", "length")],
            "RenameForm",
        );
        assert_eq!(err.detail().violations[0].message, "name failed length");
    }

    #[test]
    fn test_from_validation_errors_sorted() {
        let mut errors = validator::ValidationErrors::new();
        errors.add("zip", validator::ValidationError::new("length"));
        errors.add("city", validator::ValidationError::new("required"));

        let failures = FieldFailure::from_validation_errors(&errors);
        let fields: Vec<_> = failures.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, ["city", "zip"]);
        assert_eq!(failures[0].code, "required");
    }

    #[test]
    fn test_error_detail_serialization() {
        let detail = ErrorDetail {
            description: "Invalid input".to_string(),
            violations: vec![FieldViolation::new("email", "required")],
        };
        let json = serde_json::to_string(&detail).expect("serialization should work");
        assert_eq!(
            json,
            r#"{"description":"Invalid input","violations":[{"field":"email","message":"required"}]}"#
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::FailedPrecondition.to_string(), "failed_precondition");
        assert_eq!(ErrorKind::ALL.len(), 6);
    }
}
