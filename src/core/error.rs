// This module defines the error types for the a2xx compiler using the thiserror crate.
// CompileError separates the three ways a compile can fail: the input uses a construct
// the hardware path cannot express (Unsupported, InvalidProgram), the program outgrows a
// hardware resource (register file, constant bank, instruction memory), or the compiler
// detects an inconsistency in its own state (Internal), which is a defect rather than a
// property of the input. CompileResult<T> is the crate-wide result alias.

//! Error types for the a2xx compiler.

use thiserror::Error;

use super::register_file::RegAllocError;

/// Main error type for shader compilation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Unsupported construct: {construct}")]
    Unsupported { construct: String },

    #[error("Invalid program: {reason}")]
    InvalidProgram { reason: String },

    #[error("Register file exhausted")]
    RegisterFileExhausted,

    #[error("Constant index {index} exceeds the constant bank")]
    ConstantBankOverflow { index: u32 },

    #[error("Program too large: {cf} control-flow words and {instrs} instructions")]
    ProgramTooLarge { cf: usize, instrs: usize },

    #[error("Internal compiler error: {reason}")]
    Internal { reason: String },

    #[error("Register allocation failed: {0}")]
    RegAlloc(#[from] RegAllocError),
}

impl CompileError {
    pub fn unsupported(construct: impl Into<String>) -> Self {
        CompileError::Unsupported {
            construct: construct.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        CompileError::InvalidProgram {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        CompileError::Internal {
            reason: reason.into(),
        }
    }

    /// True for errors caused by a defect in the compiler itself.
    pub fn is_internal(&self) -> bool {
        match self {
            CompileError::Internal { .. } => true,
            CompileError::RegAlloc(err) => !matches!(err, RegAllocError::Exhausted),
            _ => false,
        }
    }
}

/// Result type for compilation operations.
pub type CompileResult<T> = Result<T, CompileError>;
