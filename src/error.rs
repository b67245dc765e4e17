// This module defines the error type for the emission layer using the thiserror crate.
// EmitterError covers every way an emission operation can fail: unsupported type or scope
// combinations, unknown or mismatched functions, conflicting struct definitions, missing
// metadata, function-stack underflow, unparsable textual IR, unknown target devices, bad
// arguments, and a catch-all Unexpected variant used for verifier failures, missing
// backends and codegen errors reported through the diagnostic handler. LLVM builder
// errors and I/O errors convert automatically so emission code can use `?` throughout.
// EmitterResult<T> is the convenience alias used by every public operation.

//! Error types for the emission layer.

use thiserror::Error;

/// Main error type for module and function emission.
#[derive(Error, Debug)]
pub enum EmitterError {
    #[error("Variable type not supported: {0}")]
    VariableTypeNotSupported(String),

    #[error("Variable scope not supported: {0}")]
    VariableScopeNotSupported(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Bad struct definition: {0}")]
    BadStructDefinition(String),

    #[error("Metadata not found: {0}")]
    MetadataNotFound(String),

    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("Parser error: {0}")]
    ParserError(String),

    #[error("Target not supported: {0}")]
    TargetNotSupported(String),

    #[error("Bad function arguments: {0}")]
    BadFunctionArguments(String),

    #[error("{0}")]
    Unexpected(String),

    #[error("LLVM builder error: {0}")]
    Builder(#[from] inkwell::builder::BuilderError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EmitterError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        EmitterError::Unexpected(message.into())
    }

    pub fn type_not_supported(message: impl Into<String>) -> Self {
        EmitterError::VariableTypeNotSupported(message.into())
    }
}

/// Result type alias for emission operations.
pub type EmitterResult<T> = Result<T, EmitterError>;
