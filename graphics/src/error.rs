//! Graphics error types.

use std::fmt;

use umbra_core::HandleError;

/// Errors that can occur in the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics system.
    InitializationFailed(String),
    /// A GPU object could not be created.
    ResourceCreationFailed(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// A handle was null, out of range or already destroyed.
    InvalidHandle {
        kind: &'static str,
        error: HandleError,
    },
    /// Resources were still alive at shutdown.
    ResourceLeak(String),
    /// Configuration could not be parsed.
    Config(String),
    /// An internal error occurred.
    Internal(String),
}

impl GraphicsError {
    pub fn invalid_handle(kind: &'static str, error: HandleError) -> Self {
        Self::InvalidHandle { kind, error }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::InvalidHandle { kind, error } => write!(f, "invalid {kind} handle: {error}"),
            Self::ResourceLeak(msg) => write!(f, "resources leaked at shutdown: {msg}"),
            Self::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}

/// Log a GPU failure with its source location and hand it back for `?`.
#[macro_export]
macro_rules! gpu_failure {
    ($err:expr) => {{
        let err: $crate::GraphicsError = $err;
        log::error!("{}:{}: {}", file!(), line!(), err);
        err
    }};
}
