//! Error taxonomy shared by every runtime component.
//!
//! Each module keeps its own `thiserror` enum; [`ErrorKind`] is the coarse
//! classification exposed to foreign callers and [`ApxError`] the umbrella type for
//! code that drives several components at once.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bytecode::DecodeError;
use crate::compiler::CompileError;
use crate::deserializer::VmError;
use crate::file_map::FileMapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    MissingBuffer,
    ElementType,
    Length,
    BufferBoundary,
    OutOfMemory,
    AddressInUse,
    FileTooLarge,
    InvalidState,
    InvalidProgram,
}

impl DecodeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidProgram
    }
}

#[derive(Debug, Error)]
pub enum ApxError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error(transparent)]
    FileMap(#[from] FileMapError),
}

impl ApxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApxError::Compile(err) => err.kind(),
            ApxError::Decode(err) => err.kind(),
            ApxError::Vm(err) => err.kind(),
            ApxError::FileMap(err) => err.kind(),
        }
    }
}

pub type ApxResult<T> = Result<T, ApxError>;
