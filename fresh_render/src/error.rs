//! Error types for the Fresh render layer
//!
//! Every fallible operation of a render context returns one of these.
//! Backends log a diagnostic line before handing the error back, so the
//! variants stay small and carry only the context a caller can act on.

use std::fmt;

use crate::graphics_api::GraphicsApi;

/// Result type for render-layer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Render-layer errors
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Backend-specific error (Vulkan, Direct3D, OpenGL)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource or argument (zero size, short data, bad slot...)
    InvalidResource(String),

    /// Device, swapchain or context creation failed
    InitializationFailed(String),

    /// `initialize` called on a context that is not in the Uninitialized state
    AlreadyInitialized,

    /// Frame or resource operation on a context that is not initialized
    NotInitialized,

    /// `begin_frame` called while a frame is already being recorded
    FrameInProgress,

    /// The swapchain no longer matches its surface and must be recreated
    SwapchainOutOfDate,

    /// The requested graphics API is not available on this platform/build
    ApiUnavailable(GraphicsApi),

    /// Shader compilation or linking failed
    ShaderCompilation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::AlreadyInitialized => write!(f, "Render context already initialized"),
            Error::NotInitialized => write!(f, "Render context not initialized"),
            Error::FrameInProgress => write!(f, "A frame is already being recorded"),
            Error::SwapchainOutOfDate => write!(f, "Swapchain out of date"),
            Error::ApiUnavailable(api) => write!(f, "Graphics API unavailable: {}", api),
            Error::ShaderCompilation(msg) => write!(f, "Shader compilation failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
