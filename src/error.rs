//! Compiler and Execution Error Types

use thiserror::Error;

/// Errors raised while turning an operator tree into SQL
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// An operator whose required shape cannot be formed on the server
    #[error("Untranslatable construct: {0}")]
    Untranslatable(String),

    /// A lambda parameter referenced outside of its lambda
    #[error("Unbound lambda parameter '{0}'")]
    UnboundParameter(String),

    /// Member access that the bound shape does not expose
    #[error("Member '{member}' is not available on {shape}")]
    UnknownMember { member: String, shape: String },

    /// Table missing from the descriptor catalog
    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    /// The IR reached a state the renderer cannot express
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid compiler configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;

/// Errors raised while executing a compiled query and materializing its rows
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Sequence contains no elements")]
    NoElements,

    #[error("Sequence contains more than one element")]
    MoreThanOneElement,

    #[error("Index {0} was out of range")]
    ElementOutOfRange(usize),

    /// Failure reported by the executor
    #[error("Executor error: {0}")]
    Executor(String),

    /// A row or structured column did not match the materializer
    #[error("Decode error: {0}")]
    Decode(String),

    /// In-memory evaluation failed
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Result type for execution
pub type ExecutionResult<T> = Result<T, ExecutionError>;
