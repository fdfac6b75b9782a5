//! Error types and reporting

use crate::interp::RuntimeError;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, RunError>;

/// Top-level failure from running a program
#[derive(Debug, Error)]
pub enum RunError {
    /// External parser failure, surfaced as-is
    #[error("parse error: {0}")]
    Parse(String),

    /// Runtime fault, including panics converted at the outermost frame
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// `run` was called on source text without a registered parser
    #[error("no parser registered; call set_parser or use run_file")]
    NoParser,
}

impl RunError {
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// The underlying runtime error, if any
    pub fn runtime(&self) -> Option<&RuntimeError> {
        match self {
            Self::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = RunError::parse_error("unexpected token");
        assert_eq!(format!("{err}"), "parse error: unexpected token");
    }

    #[test]
    fn test_runtime_error_passthrough() {
        let err: RunError = RuntimeError::undefined("x").into();
        assert_eq!(format!("{err}"), "undefined: x");
        assert!(err.runtime().is_some());
    }

    #[test]
    fn test_no_parser_display() {
        let err = RunError::NoParser;
        assert!(format!("{err}").contains("no parser"));
    }
}
