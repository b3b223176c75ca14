//! Error types for session operations

use std::ffi::NulError;
use std::fmt;
use thiserror::Error;

use crate::catalog::Role;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, running or decoding a session
#[derive(Debug, Error)]
pub enum Error {
    /// The model's binding table cannot be served by this session
    #[error("Model structure error: {0}")]
    ModelStructure(#[from] ModelStructureError),

    /// Device memory could not be allocated; partial allocations were rolled back
    #[error("Allocation error: {role} buffer {index} ({bytes} bytes): {reason}")]
    Allocation {
        role: Role,
        index: usize,
        bytes: usize,
        reason: String,
    },

    /// Buffers were already allocated; free them before allocating again
    #[error("Allocation error: device buffers already allocated")]
    AlreadyAllocated,

    /// Caller-supplied host buffers do not match the binding catalog
    #[error("Buffer contract error: {0}")]
    BufferContract(#[from] BufferContractError),

    /// Decoded output violates the detection schema
    #[error("Detection schema error: {0}")]
    DetectionSchema(#[from] DetectionSchemaError),

    /// The operation is part of the API surface but has no implementation yet
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    /// The session has been torn down
    #[error("Session is closed")]
    SessionClosed,

    /// Invalid argument provided to function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Out of memory
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Runtime error from TensorRT
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// CUDA error
    #[error("CUDA error: {0}")]
    Cuda(String),

    /// Unknown error
    #[error("Unknown error: {0}")]
    Unknown(String),

    /// String conversion error
    #[error("String conversion error: {0}")]
    StringConversion(#[from] NulError),

    /// UTF-8 conversion error
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Malformed or unsupported binding shapes, detected at load time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelStructureError {
    #[error("no dimensions for binding {binding} ({name})")]
    NoDimensions { binding: usize, name: String },

    #[error("invalid dimension at binding {binding}, axis {axis}: {value}")]
    InvalidDimension {
        binding: usize,
        axis: usize,
        value: i64,
    },

    #[error("element count of binding {binding} overflows")]
    ElementCountOverflow { binding: usize },

    #[error("model needs at least one input and one output (found {inputs} inputs, {outputs} outputs)")]
    MissingRole { inputs: usize, outputs: usize },
}

/// One host buffer whose declared size disagrees with its binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeMismatch {
    pub role: Role,
    pub index: usize,
    pub expected: usize,
    pub received: usize,
}

impl fmt::Display for SizeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: expected {} bytes, got {}",
            self.role, self.index, self.expected, self.received
        )
    }
}

/// Host buffers handed to an inference call break the binding contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferContractError {
    #[error("buffer count mismatch: expected {expected_inputs} inputs and {expected_outputs} outputs, got {inputs} and {outputs}")]
    CountMismatch {
        expected_inputs: usize,
        expected_outputs: usize,
        inputs: usize,
        outputs: usize,
    },

    #[error("buffer size mismatch: {}", join_mismatches(.0))]
    SizeMismatch(Vec<SizeMismatch>),

    #[error("null {role} buffer at index {index}")]
    NullBuffer { role: Role, index: usize },
}

fn join_mismatches(mismatches: &[SizeMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Output tensors (or a schema descriptor) that do not fit the detection layout
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionSchemaError {
    #[error("detection count {count} outside [0, {max}]")]
    CountOutOfRange { count: i64, max: usize },

    #[error("expected {expected} output buffers, got {received}")]
    OutputCount { expected: usize, received: usize },

    #[error("output {index} holds {received} bytes, schema expects {expected}")]
    BufferSize {
        index: usize,
        expected: usize,
        received: usize,
    },

    #[error("output {index} does not match schema: {reason}")]
    OutputMismatch { index: usize, reason: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

#[cfg(feature = "tensorrt")]
impl Error {
    /// Create error from FFI error code and message buffer
    pub(crate) fn from_ffi(code: i32, error_msg: &[std::os::raw::c_char]) -> Self {
        let msg = Self::parse_error_msg(error_msg);

        match code {
            code if code == trt_session_sys::TRTX_ERROR_INVALID_ARGUMENT as i32 => {
                Error::InvalidArgument(msg)
            }
            code if code == trt_session_sys::TRTX_ERROR_OUT_OF_MEMORY as i32 => {
                Error::OutOfMemory(msg)
            }
            code if code == trt_session_sys::TRTX_ERROR_RUNTIME_ERROR as i32 => Error::Runtime(msg),
            code if code == trt_session_sys::TRTX_ERROR_CUDA_ERROR as i32 => Error::Cuda(msg),
            _ => Error::Unknown(msg),
        }
    }

    /// Parse error message from C string buffer
    fn parse_error_msg(buffer: &[std::os::raw::c_char]) -> String {
        // Find null terminator
        let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());

        let bytes: Vec<u8> = buffer[..len].iter().map(|&c| c as u8).collect();

        String::from_utf8_lossy(&bytes).into_owned()
    }
}
