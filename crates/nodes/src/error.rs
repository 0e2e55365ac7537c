//! Node-level error types.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// Every variant aborts the surrounding execution; the engine records the
/// message on the failing node's log row and on the execution itself.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    /// A config key the node needs is missing or has the wrong shape.
    #[error("invalid config '{field}': {message}")]
    InvalidConfig {
        field: &'static str,
        message: String,
    },

    /// An expression in the node's config could not be evaluated.
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// An outbound HTTP call failed or returned an error status.
    #[error("http request failed: {0}")]
    Http(String),

    /// The node ran but reported a failure of its own.
    #[error("{0}")]
    Failed(String),
}

impl NodeError {
    pub fn missing(field: &'static str) -> Self {
        Self::InvalidConfig {
            field,
            message: "required".into(),
        }
    }

    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }
}

/// Errors raised by the arithmetic half of the expression language.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at offset {offset} in '{expr}'")]
    UnexpectedChar {
        expr: String,
        ch: char,
        offset: usize,
    },

    #[error("malformed arithmetic expression '{0}'")]
    Malformed(String),

    #[error("division by zero in '{0}'")]
    DivisionByZero(String),

    #[error("arithmetic expression '{0}' nests too deeply")]
    TooDeep(String),
}
