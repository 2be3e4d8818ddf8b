//! Error handling for gcodekit4.
//!
//! A single unified error type covering parsing, argument validation,
//! machine-reported faults, communication failures, cancellation, and
//! internal invariant violations. Uses `thiserror` for ergonomic
//! `Display`/`std::error::Error` impls and `#[from]` conversions, the same
//! pattern the wider workspace uses to unify its per-layer error enums.

use thiserror::Error;

/// Unified error type for gcodekit4.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A G-code line could not be parsed.
    #[error("parse error at line {line_number}: {reason}")]
    ParseError { line_number: u32, reason: String },

    /// An operation was called with an argument it cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The machine reported a fault, keyed by the controller's own error code.
    #[error("machine error {code}: {message}")]
    MachineError { code: String, message: String },

    /// A communication-layer failure (serial/TCP I/O, framing, timeout).
    #[error("communication error: {0}")]
    CommError(String),

    /// The in-flight operation was cancelled before completion.
    #[error("cancelled")]
    Cancelled,

    /// An internal invariant was violated; indicates a bug rather than bad input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a [`Error::ParseError`].
    pub fn parse(line_number: u32, reason: impl Into<String>) -> Self {
        Error::ParseError {
            line_number,
            reason: reason.into(),
        }
    }

    /// Build a [`Error::InvalidArgument`].
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument(reason.into())
    }

    /// Build a [`Error::MachineError`].
    pub fn machine(code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::MachineError {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a [`Error::CommError`].
    pub fn comm(reason: impl Into<String>) -> Self {
        Error::CommError(reason.into())
    }

    /// Build a [`Error::Internal`].
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal(reason.into())
    }

    /// True if this error represents a machine-reported fault.
    pub fn is_machine_error(&self) -> bool {
        matches!(self, Error::MachineError { .. })
    }

    /// True if the operation was cancelled rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::CommError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ParseError {
            line_number: 0,
            reason: e.to_string(),
        }
    }
}

/// Result type using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_reason() {
        let err = Error::parse(42, "unexpected token");
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("unexpected token"));
    }

    #[test]
    fn machine_error_flag() {
        assert!(Error::machine("alarm:1", "hard limit").is_machine_error());
        assert!(!Error::Cancelled.is_machine_error());
    }

    #[test]
    fn io_error_converts_to_comm_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::CommError(_)));
    }
}
