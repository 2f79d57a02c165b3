//! Error type for native platform calls.
//!
//! None of these ever reach a caller of the service: every component turns
//! them into `false` or `None` at its boundary.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// A native call returned a failure status (HRESULT, CONFIGRET, Win32 code).
    #[error("{context} failed with status {code:#010X}")]
    Native { context: &'static str, code: i32 },

    /// The object the call was looking for does not exist (or vanished).
    #[error("not found: {0}")]
    NotFound(String),

    /// The source exists but cannot answer right now (busy, denied, disconnected).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// There is no native backend for this operating system.
    #[error("unsupported platform")]
    Unsupported,
}

impl PlatformError {
    pub fn native(context: &'static str, code: i32) -> Self {
        Self::Native { context, code }
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;
