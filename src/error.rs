//! Error types for the field engine.

use std::fmt;

/// Errors produced by field construction, connection, and I/O.
///
/// Each variant corresponds to one of the error kinds named by the field
/// engine's error handling design: bad input is always `InvalidArgument`,
/// an on-disk shape that does not match what the field declared is always
/// `SchemaMismatch`, and so on. None of these are raised for conditions a
/// caller cannot trigger; those are bugs and panic instead.
#[derive(thiserror::Error, Debug)]
pub enum FieldError {
    /// Bad field name, unknown type name, or a representation that was
    /// never declared by the field.
    #[error("invalid argument for field '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    /// The on-disk column types (or type version) do not match any
    /// representation this field declares.
    #[error("schema mismatch for field '{field}': {reason}")]
    SchemaMismatch { field: String, reason: String },

    /// The operation requires a different connection state.
    #[error("field '{field}' is in state {state:?}, which does not allow this operation")]
    StateViolation { field: String, state: FieldState },

    /// The requested type or construction path is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Propagated from the page sink/source.
    #[error("page storage error for field '{field}': {source}")]
    Io {
        field: String,
        #[source]
        source: std::io::Error,
    },
}

impl FieldError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FieldError::InvalidArgument { field: field.into(), reason: reason.into() }
    }

    pub fn schema_mismatch(field: impl Into<String>, reason: impl Into<String>) -> Self {
        FieldError::SchemaMismatch { field: field.into(), reason: reason.into() }
    }

    pub fn state_violation(field: impl Into<String>, state: FieldState) -> Self {
        FieldError::StateViolation { field: field.into(), state }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        FieldError::Unsupported(reason.into())
    }

    pub fn io(field: impl Into<String>, source: std::io::Error) -> Self {
        FieldError::Io { field: field.into(), source }
    }
}

/// The connection state of a field, re-exported here so [`FieldError`] can
/// report it without creating a dependency cycle with `crate::field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    Unconnected,
    ConnectedSink,
    ConnectedSource,
}

impl fmt::Display for FieldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub type Result<T> = std::result::Result<T, FieldError>;
