//! Expression evaluation capability.
//!
//! The registry and processor only see this narrow interface: compile once,
//! evaluate many times against JSON input. The concrete language lives
//! behind [`ExpressionEngine`] so it can be swapped without touching either.
//!
//! Implementations:
//! - [`jsonata::JsonataEngine`]: JSONata subset (default)

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

pub mod jsonata;

pub use jsonata::JsonataEngine;

/// Result type for expression operations.
pub type Result<T> = std::result::Result<T, ExpressionError>;

/// Errors raised while compiling or evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Compile error at position {position}: {message}")]
    Compile { position: usize, message: String },

    #[error("Evaluation error: {0}")]
    Evaluate(String),
}

impl ExpressionError {
    pub(crate) fn compile(position: usize, message: impl Into<String>) -> Self {
        Self::Compile {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn evaluate(message: impl Into<String>) -> Self {
        Self::Evaluate(message.into())
    }
}

/// A compiled, reusable expression.
///
/// Evaluation is synchronous and must not block on I/O.
pub trait CompiledExpression: Send + Sync + fmt::Debug {
    /// Evaluate against a JSON input, producing a JSON output.
    fn evaluate(&self, input: &Value) -> Result<Value>;
}

/// Compiles expression text into [`CompiledExpression`] handles.
pub trait ExpressionEngine: Send + Sync {
    /// Short language name for logs.
    fn name(&self) -> &'static str;

    /// Compile expression text.
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledExpression>>;
}
