//! Error types for bridge calls

use std::fmt;

/// Result type for bridge calls
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Stable, machine-matchable failure kind.
///
/// Several `BridgeError` variants share a kind; callers matching on failures
/// across the script boundary should use the kind, not the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bridge used before `initialize`
    NotInitialized,
    /// Unknown method name for the bridge
    MethodNotFound,
    /// Unknown bridge identifier in a registry
    BridgeNotFound,
    /// Wrong count, wrong variant, or semantically invalid argument
    InvalidArgument,
    /// Custom handle payload did not match the expected native type
    DowncastFailure,
    /// The wrapped domain operation failed
    UpstreamFailure,
    /// The call context was cancelled or ran past its deadline
    Cancelled,
}

impl ErrorKind {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotInitialized => "not_initialized",
            ErrorKind::MethodNotFound => "method_not_found",
            ErrorKind::BridgeNotFound => "bridge_not_found",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::DowncastFailure => "downcast_failure",
            ErrorKind::UpstreamFailure => "upstream_failure",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bridge error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// Method executed on a bridge that has not been initialized
    #[error("Bridge '{bridge}' is not initialized")]
    NotInitialized {
        /// Bridge identifier
        bridge: String,
    },

    /// Method name not recognized by the bridge
    #[error("Method not found: {bridge}.{method}")]
    MethodNotFound {
        /// Bridge identifier
        bridge: String,
        /// Requested method name
        method: String,
    },

    /// Bridge identifier not present in a registry
    #[error("Bridge not found: {bridge}")]
    BridgeNotFound {
        /// Requested bridge identifier
        bridge: String,
    },

    /// A positional argument had the wrong shape
    #[error("{method}: argument {index} ({name}) must be {expected}, got {actual}")]
    InvalidArgument {
        /// Method being called
        method: String,
        /// Zero-based argument position
        index: usize,
        /// Declared parameter name
        name: String,
        /// Expected shape
        expected: String,
        /// Actual shape
        actual: String,
    },

    /// Too few arguments for the method
    #[error("{method} requires {required} argument(s), got {got}")]
    ArgumentCount {
        /// Method being called
        method: String,
        /// Number of required parameters
        required: usize,
        /// Number of supplied arguments
        got: usize,
    },

    /// Typed accessor used on the wrong value variant
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Custom handle payload had an unexpected native type
    #[error("Handle '{tag}' does not hold {expected} (holds {actual})")]
    DowncastFailure {
        /// Tag carried by the handle
        tag: String,
        /// Expected native type
        expected: String,
        /// Native type actually stored
        actual: String,
    },

    /// Wrapped domain operation failed
    #[error("{operation} failed: {message}")]
    Upstream {
        /// Operation that failed
        operation: String,
        /// Failure description
        message: String,
    },

    /// Call context cancelled or deadline exceeded
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that observed the cancellation
        operation: String,
    },
}

impl BridgeError {
    /// Machine-matchable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::NotInitialized { .. } => ErrorKind::NotInitialized,
            BridgeError::MethodNotFound { .. } => ErrorKind::MethodNotFound,
            BridgeError::BridgeNotFound { .. } => ErrorKind::BridgeNotFound,
            BridgeError::InvalidArgument { .. }
            | BridgeError::ArgumentCount { .. }
            | BridgeError::TypeMismatch { .. } => ErrorKind::InvalidArgument,
            BridgeError::DowncastFailure { .. } => ErrorKind::DowncastFailure,
            BridgeError::Upstream { .. } => ErrorKind::UpstreamFailure,
            BridgeError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Shorthand for an `Upstream` failure
    pub fn upstream(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        BridgeError::Upstream {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a semantically invalid argument
    pub fn invalid_argument(
        method: impl Into<String>,
        index: usize,
        name: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        BridgeError::InvalidArgument {
            method: method.into(),
            index,
            name: name.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<String> for BridgeError {
    fn from(s: String) -> Self {
        BridgeError::upstream("bridge", s)
    }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self {
        BridgeError::upstream("bridge", s)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::upstream("json", e)
    }
}
