//! rilox main module.
//!
//! A single-pass bytecode compiler and stack-based virtual machine for Lox.
//! Source text is scanned, parsed with a Pratt parser, and emitted directly
//! into a [chunk::Chunk] of bytecode (there is no AST). The [vm::VM] then
//! executes that chunk.

pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod error;
pub mod heap;
pub mod scanner;
pub mod table;
pub mod value;
pub mod vm;

mod with_try_from_u8;

/// The result of anything that can fail with an [error::InterpretationError].
pub type Result<T> = std::result::Result<T, error::InterpretationError>;

/// Re-exports common items.
pub mod prelude {
    pub use crate::chunk::{Chunk, OpCode};
    pub use crate::error::InterpretationError;
    pub use crate::heap::{Heap, StrRef};
    pub use crate::scanner::{Scanner, Token, TokenKind};
    pub use crate::value::Value;
    pub use crate::vm::VM;
}
