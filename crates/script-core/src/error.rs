//! Error types for script-core
//!
//! Script faults are recoverable by design of the runtime: they are routed
//! through [`Interpreter::error`](crate::Interpreter::error) and never escape
//! to the process. [`ScriptError`] is the typed payload carried along that
//! path and by compile diagnostics.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for script operations
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Errors raised while compiling or executing a script
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// Symbol referenced but never defined
    #[error("symbol not found: {name}")]
    SymbolNotFound { name: String },

    /// Symbol arena exhausted
    #[error("symbol space exhausted ({limit} symbols)")]
    SymbolSpaceExhausted { limit: usize },

    /// None of the listed labels or events could be resolved
    #[error("label not found: {targets}")]
    LabelNotFound { targets: String },

    /// Frame stack would exceed its configured maximum
    #[error("stack overflow: frame depth {depth} exceeds maximum")]
    StackOverflow { depth: usize },

    /// Loop control used outside of a loop frame
    #[error("{command} outside of loop")]
    NotInLoop { command: &'static str },

    /// Division or modulo by zero
    #[error("divide by zero")]
    DivideByZero,

    /// Operand is not a valid decimal number
    #[error("invalid number: {value}")]
    InvalidNumber { value: String },

    /// Malformed expression
    #[error("invalid expression: {details}")]
    InvalidExpression { details: String },

    /// Arithmetic result out of range
    #[error("arithmetic overflow")]
    Overflow,

    /// Command not known to the host
    #[error("unknown command: {name}")]
    UnknownCommand { name: String },

    /// Host command reported a failure
    #[error("{command}: {reason}")]
    CommandFailed { command: String, reason: String },

    /// Error raised explicitly by the script
    #[error("{message}")]
    Raised { message: String },

    /// Image rejected by the compiler
    #[error("compile failed with {} error(s)", .0.len())]
    Compile(Vec<Diagnostic>),
}

impl ScriptError {
    /// Create a symbol not found error
    pub fn symbol_not_found(name: impl Into<String>) -> Self {
        Self::SymbolNotFound { name: name.into() }
    }

    /// Create an invalid number error
    pub fn invalid_number(value: impl Into<String>) -> Self {
        Self::InvalidNumber { value: value.into() }
    }

    /// Create an invalid expression error
    pub fn invalid_expression(details: impl Into<String>) -> Self {
        Self::InvalidExpression { details: details.into() }
    }
}

/// One compile diagnostic, reported as `file:line: message`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl Diagnostic {
    pub fn new(file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}
