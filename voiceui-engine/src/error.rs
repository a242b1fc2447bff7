/// Engine error type
///
/// Every failure maps onto one of the two negative status codes the stream
/// layer understands: `-ENOMEM` for allocation failures and `-EINVAL` for
/// everything else (malformed wire data, unregistered streams).

use crate::types::StreamHandle;
use std::collections::TryReserveError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VuiError {
    #[error("Allocation of {0} bytes failed")]
    NoMemory(usize),

    #[error("Stream {0} not registered to interface")]
    StreamNotRegistered(StreamHandle),

    #[error("Unsupported key id {0:#x}")]
    UnknownKey(u32),

    #[error("Payload size mismatch for {what}: expected {expected}, got {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Truncated {what}: need {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Invalid confidence level {level} at {context}")]
    InvalidLevel { level: u32, context: String },

    #[error("Invalid user id {user_id} (valid range {min}..{max})")]
    InvalidUserId { user_id: u32, min: u32, max: u32 },

    #[error("Duplicate user id {0}")]
    DuplicateUserId(u32),

    #[error("Invalid sound model: {0}")]
    InvalidSoundModel(String),

    #[error("Invalid recognition config: {0}")]
    InvalidRecognitionConfig(String),

    #[error("Invalid detection payload: {0}")]
    InvalidDetectionPayload(String),

    #[error("Unsupported module type: {0}")]
    UnsupportedModuleType(String),
}

impl VuiError {
    /// Negative errno status code for this error
    pub fn errno(&self) -> i32 {
        match self {
            VuiError::NoMemory(_) => -libc::ENOMEM,
            _ => -libc::EINVAL,
        }
    }
}

pub type VuiResult<T> = Result<T, VuiError>;

/// Allocate a zeroed owned buffer, reporting failure instead of aborting
pub(crate) fn alloc_zeroed(len: usize) -> VuiResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_: TryReserveError| VuiError::NoMemory(len))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Copy a slice into a freshly allocated owned buffer
pub(crate) fn alloc_copy(src: &[u8]) -> VuiResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(src.len())
        .map_err(|_: TryReserveError| VuiError::NoMemory(src.len()))?;
    buf.extend_from_slice(src);
    Ok(buf)
}
