//! Error types for the capz reconciliation engine
//!
//! Errors are classified by kind, never by message. The wrapping variants
//! (`Terminal`, `Transient`, `Context`) keep the wrapped error as their
//! source, and every classification predicate walks that chain, so a
//! `Context` around a `Transient` around an `OperationNotDone` still reports
//! `is_operation_not_done() == true`.

use std::time::Duration;

use thiserror::Error;

use crate::crd::Future;
use crate::DEFAULT_REQUEUE_AFTER;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Reason reported for terminal errors that do not carry their own
pub const DEFAULT_TERMINAL_REASON: &str = "Failed";

/// ARM error codes that mean the resource (or its parent) does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "NotFound",
    "ResourceNotFound",
    "ResourceGroupNotFound",
    "ParentResourceNotFound",
];

/// ARM error codes that are safe to retry even though they come back as 4xx
const RETRYABLE_CODES: &[&str] = &[
    "AnotherOperationInProgress",
    "OperationPreempted",
    "ReferencedResourceNotProvisioned",
    "RetryableError",
    "TooManyRequests",
];

/// Classification of an error for the reconcile loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The resource does not exist
    NotFound,
    /// Reconciliation must stop until the spec changes
    Terminal,
    /// Reconciliation must be retried after a delay
    Transient,
    /// A long-running operation is still in flight (a transient sub-kind)
    OperationNotDone,
}

/// Error returned by Azure Resource Manager
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("azure error [{status} {code}]: {message}")]
pub struct AzureError {
    /// HTTP status code of the response
    pub status: u16,
    /// ARM error code (e.g. `ResourceGroupNotFound`)
    pub code: String,
    /// Human-readable message from the error body
    pub message: String,
    /// Delay requested through the `Retry-After` header
    pub retry_after: Option<Duration>,
}

impl AzureError {
    /// Create an Azure error from status, code and message
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach the delay from a `Retry-After` header
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Whether the error means the resource does not exist
    pub fn is_not_found(&self) -> bool {
        self.status == 404 || NOT_FOUND_CODES.contains(&self.code.as_str())
    }

    /// Whether the request may succeed if retried unchanged
    ///
    /// Throttling, timeouts, server errors and a small set of ARM codes
    /// describing contention are retryable; other 4xx are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, 408 | 429)
            || self.status >= 500
            || RETRYABLE_CODES.contains(&self.code.as_str())
    }
}

/// Main error type for capz operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Azure Resource Manager error
    #[error("{source}")]
    Azure {
        /// The ARM error
        #[from]
        source: AzureError,
    },

    /// Reconciliation must stop until the spec changes
    #[error("{message}")]
    Terminal {
        /// Machine-readable reason surfaced on the condition
        reason: String,
        /// Description of what failed
        message: String,
        /// Wrapped cause, if any
        #[source]
        source: Option<Box<Error>>,
    },

    /// Reconciliation must be retried after `requeue_after`
    #[error("{message}")]
    Transient {
        /// Description of what failed
        message: String,
        /// Delay before the next attempt
        requeue_after: Duration,
        /// Wrapped cause, if any
        #[source]
        source: Option<Box<Error>>,
    },

    /// A long-running operation has not completed yet
    #[error(
        "operation type {} on Azure resource {}/{} is not done",
        future.type_,
        future.resource_group,
        future.name
    )]
    OperationNotDone {
        /// Handle to the in-flight operation
        future: Box<Future>,
    },

    /// A named resource does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the resource looked up
        kind: String,
        /// Name of the resource looked up
        name: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Persisted data could not be decoded
    #[error("failed to unmarshal {target}: {message}")]
    Unmarshal {
        /// What was being decoded (e.g. "future data")
        target: String,
        /// Description of what failed
        message: String,
    },

    /// Validation error for a spec
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path, if known
        field: Option<String>,
    },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Deadline that elapsed
        after: Duration,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },

    /// An error annotated with what the caller was doing
    #[error("{message}: {source}")]
    Context {
        /// What the caller was doing
        message: String,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a terminal error with the given reason and message
    pub fn terminal(reason: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Terminal {
            reason: reason.into(),
            message: msg.into(),
            source: None,
        }
    }

    /// Mark an existing error as terminal, keeping it as the source
    pub fn with_terminal(source: Error, reason: impl Into<String>) -> Self {
        Self::Terminal {
            reason: reason.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transient error that requeues after the given delay
    pub fn transient(msg: impl Into<String>, requeue_after: Duration) -> Self {
        Self::Transient {
            message: msg.into(),
            requeue_after,
            source: None,
        }
    }

    /// Mark an existing error as transient, keeping it as the source
    pub fn with_transient(source: Error, requeue_after: Duration) -> Self {
        Self::Transient {
            message: source.to_string(),
            requeue_after,
            source: Some(Box::new(source)),
        }
    }

    /// Create a transient "operation not done" error carrying the future
    pub fn operation_not_done(future: Future, requeue_after: Duration) -> Self {
        Self::with_transient(
            Self::OperationNotDone {
                future: Box::new(future),
            },
            requeue_after,
        )
    }

    /// Create a not-found error for a named resource
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an unmarshal error for persisted data
    pub fn unmarshal(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Unmarshal {
            target: target.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Annotate this error with what the caller was doing
    ///
    /// The classification of the wrapped error is preserved.
    pub fn wrap(self, msg: impl Into<String>) -> Self {
        Self::Context {
            message: msg.into(),
            source: Box::new(self),
        }
    }

    /// Classify this error, looking through wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 404 => ErrorKind::NotFound,
                kube::Error::Api(ae)
                    if (400..500).contains(&ae.code) && !matches!(ae.code, 409 | 429) =>
                {
                    ErrorKind::Terminal
                }
                _ => ErrorKind::Transient,
            },
            Error::Azure { source } => {
                if source.is_not_found() {
                    ErrorKind::NotFound
                } else if source.is_retryable() {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Terminal
                }
            }
            Error::Terminal { .. } => ErrorKind::Terminal,
            Error::Transient {
                source: Some(source),
                ..
            } if source.is_operation_not_done() => ErrorKind::OperationNotDone,
            Error::Transient { .. } => ErrorKind::Transient,
            Error::OperationNotDone { .. } => ErrorKind::OperationNotDone,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Serialization { .. } | Error::Unmarshal { .. } | Error::Validation { .. } => {
                ErrorKind::Terminal
            }
            Error::Timeout { .. } | Error::Internal { .. } => ErrorKind::Transient,
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Whether the resource does not exist
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Whether reconciliation must stop until the spec changes
    pub fn is_terminal(&self) -> bool {
        self.kind() == ErrorKind::Terminal
    }

    /// Whether reconciliation should be retried (includes operation-not-done)
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::OperationNotDone
        )
    }

    /// Whether a long-running operation is still in flight
    pub fn is_operation_not_done(&self) -> bool {
        self.kind() == ErrorKind::OperationNotDone
    }

    /// Delay before the next reconcile attempt, for retryable errors
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Error::Transient { requeue_after, .. } => Some(*requeue_after),
            Error::Azure { source } if source.is_retryable() => {
                Some(source.retry_after.unwrap_or(DEFAULT_REQUEUE_AFTER))
            }
            Error::Context { source, .. } => source.requeue_after(),
            other if other.is_transient() => Some(DEFAULT_REQUEUE_AFTER),
            _ => None,
        }
    }

    /// The in-flight operation carried by an operation-not-done error
    pub fn future(&self) -> Option<&Future> {
        match self {
            Error::OperationNotDone { future } => Some(future),
            Error::Transient {
                source: Some(source),
                ..
            }
            | Error::Terminal {
                source: Some(source),
                ..
            }
            | Error::Context { source, .. } => source.future(),
            _ => None,
        }
    }

    /// Reason to surface on a condition for terminal errors
    pub fn reason(&self) -> &str {
        match self {
            Error::Terminal { reason, .. } => reason,
            Error::Context { source, .. } => source.reason(),
            _ => DEFAULT_TERMINAL_REASON,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::FutureType;

    fn sample_future() -> Future {
        Future {
            type_: FutureType::Create,
            service_name: "group".to_string(),
            name: "rg1".to_string(),
            resource_group: "rg1".to_string(),
            data: "e30".to_string(),
        }
    }

    // ==========================================================================
    // Story Tests: Classifying errors for the reconcile loop
    // ==========================================================================

    /// Story: an in-flight operation surfaces as a transient error that still
    /// knows it is "not done", even after callers add context
    #[test]
    fn story_operation_not_done_survives_wrapping() {
        let err = Error::operation_not_done(sample_future(), Duration::from_secs(20));
        assert!(err.is_operation_not_done());
        assert!(err.is_transient());
        assert!(!err.is_terminal());
        assert_eq!(err.requeue_after(), Some(Duration::from_secs(20)));

        let wrapped = err.wrap("failed to create resource rg1/rg1 (service: group)");
        assert!(wrapped.is_operation_not_done());
        assert_eq!(wrapped.future().map(|f| f.name.as_str()), Some("rg1"));
        assert_eq!(wrapped.requeue_after(), Some(Duration::from_secs(20)));
        assert!(wrapped.to_string().contains("is not done"));
    }

    /// Story: throttling and server errors from Azure are retried, bad
    /// requests are not
    #[test]
    fn story_azure_errors_are_classified_by_status_and_code() {
        let throttled: Error = AzureError::new(429, "TooManyRequests", "slow down")
            .with_retry_after(Duration::from_secs(7))
            .into();
        assert!(throttled.is_transient());
        assert_eq!(throttled.requeue_after(), Some(Duration::from_secs(7)));

        let server: Error = AzureError::new(503, "ServiceUnavailable", "try later").into();
        assert!(server.is_transient());
        assert_eq!(server.requeue_after(), Some(DEFAULT_REQUEUE_AFTER));

        let busy: Error = AzureError::new(409, "AnotherOperationInProgress", "busy").into();
        assert!(busy.is_transient());

        let invalid: Error = AzureError::new(400, "InvalidParameter", "bad cidr").into();
        assert!(invalid.is_terminal());
        assert_eq!(invalid.requeue_after(), None);

        let missing: Error = AzureError::new(404, "ResourceGroupNotFound", "gone").into();
        assert!(missing.is_not_found());
        assert!(!missing.is_terminal());
    }

    /// Story: malformed persisted data stops reconciliation
    #[test]
    fn story_malformed_input_is_terminal() {
        assert!(Error::unmarshal("future data", "empty").is_terminal());
        assert!(Error::serialization("bad json").is_terminal());
        assert!(Error::validation("negative replicas").is_terminal());
    }

    #[rstest::rstest]
    #[case(404, "ResourceNotFound", ErrorKind::NotFound)]
    #[case(400, "ParentResourceNotFound", ErrorKind::NotFound)]
    #[case(408, "RequestTimeout", ErrorKind::Transient)]
    #[case(500, "InternalServerError", ErrorKind::Transient)]
    #[case(400, "ReferencedResourceNotProvisioned", ErrorKind::Transient)]
    #[case(403, "AuthorizationFailed", ErrorKind::Terminal)]
    #[case(409, "Conflict", ErrorKind::Terminal)]
    fn test_azure_error_kind(#[case] status: u16, #[case] code: &str, #[case] kind: ErrorKind) {
        let err: Error = AzureError::new(status, code, "msg").into();
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn test_terminal_reason_is_preserved_through_context() {
        let err = Error::terminal("InvalidTags", "malformed last-applied tags").wrap("reconciling");
        assert!(err.is_terminal());
        assert_eq!(err.reason(), "InvalidTags");
        assert_eq!(Error::internal("x").reason(), DEFAULT_TERMINAL_REASON);
    }

    #[test]
    fn test_with_terminal_overrides_transient_source() {
        let err = Error::with_terminal(
            AzureError::new(500, "InternalServerError", "boom").into(),
            "Failed",
        );
        assert!(err.is_terminal());
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_with_transient_keeps_message() {
        let err = Error::with_transient(Error::validation("not ready"), Duration::from_secs(3));
        assert!(err.is_transient());
        assert!(err.to_string().contains("not ready"));
        assert_eq!(err.requeue_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_not_found_variant() {
        let err = Error::not_found("ResourceGroup", "rg1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "ResourceGroup rg1 not found");
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = Error::timeout("service group reconcile", Duration::from_secs(12));
        assert!(err.is_transient());
        assert_eq!(err.requeue_after(), Some(DEFAULT_REQUEUE_AFTER));
    }

    #[test]
    fn test_serde_json_error_converts_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn test_internal_error_with_context() {
        let err = Error::internal_with_context("poller", "unexpected state");
        assert!(err.to_string().contains("[poller]"));
        assert!(err.is_transient());
    }
}
