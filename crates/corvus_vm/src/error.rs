//! Layered error types (§7 and the "Error type layout" supplement).
//!
//! Each crate owns its own error enum; `CorvusError` wraps all of them so
//! the CLI can propagate a single type with `?` from source loading through
//! to execution.

use corvus_lexer::Span;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("'{name}' is already declared in this scope at line {}", .span.line)]
    Redeclared { name: String, span: Span },

    #[error("cannot assign to const '{name}' at line {}", .span.line)]
    AssignToConst { name: String, span: Span },

    #[error("unresolved identifier '{name}' at line {}", .span.line)]
    UnresolvedIdentifier { name: String, span: Span },

    #[error("{op} requires {expected} argument(s) at line {}", .span.line)]
    ArityMismatch { op: String, expected: usize, span: Span },

    #[error("too many {what} ({count}) in a single prototype at line {}", .span.line)]
    PoolOverflow { what: String, count: usize, span: Span },
}

impl CompileError {
    pub fn span(&self) -> &Span {
        match self {
            CompileError::Redeclared { span, .. }
            | CompileError::AssignToConst { span, .. }
            | CompileError::UnresolvedIdentifier { span, .. }
            | CompileError::ArityMismatch { span, .. }
            | CompileError::PoolOverflow { span, .. } => span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("unsupported operand type(s) for {op}: '{lhs}' and '{rhs}'")]
    TypeMismatch { op: &'static str, lhs: &'static str, rhs: &'static str },

    #[error("bad operand type for {op}: '{ty}'")]
    TypeError { op: &'static str, ty: &'static str },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    #[error("'{name}' is not defined")]
    UndefinedGlobal { name: String },

    #[error("'{ty}' is not callable")]
    NotCallable { ty: &'static str },

    #[error("'{ty}' is not indexable")]
    NotIndexable { ty: &'static str },

    #[error("'{func}' expects {expected} argument(s), got {got}")]
    ArityMismatch { func: String, expected: usize, got: usize },

    #[error("argument {index} to '{func}' must be {expected}, got '{got}'")]
    ArgumentType { func: String, index: usize, expected: &'static str, got: &'static str },

    #[error("pop from empty stack")]
    StackUnderflow,

    #[error("stack exceeded {limit} slots")]
    StackOverflow { limit: usize },

    #[error("call stack exceeded {limit} frames")]
    CallDepthExceeded { limit: usize },

    #[error("malformed numeric conversion: '{raw}'")]
    NumericConversion { raw: String },

    #[error("{0}")]
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CorvusError {
    #[error(transparent)]
    Lex(#[from] corvus_lexer::LexError),
    #[error(transparent)]
    Parse(#[from] corvus_parser::ParseError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub type CompileResult<T> = Result<T, CompileError>;
pub type RuntimeResult<T> = Result<T, RuntimeError>;
pub type CorvusResult<T> = Result<T, CorvusError>;
