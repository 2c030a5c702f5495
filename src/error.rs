//! Provides [InterpretationError], the error that most things return.
use thiserror::Error;

/// Any error that can occur during interpretation.
///
/// The two variants are deliberately independent: a compile error means no
/// bytecode ever ran, whereas a runtime error means execution started and
/// stopped partway through.
#[derive(Debug, Error)]
pub enum InterpretationError {
    /// A compile-time error, such as a syntax error.
    #[error("compile-time error")]
    CompileError,
    /// A runtime error, such as a type error or an undefined variable.
    #[error("runtime error")]
    RuntimeError,
}
