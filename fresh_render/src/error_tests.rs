//! Unit tests for error.rs
//!
//! Tests all Error variants and their implementations (Display, Debug, Clone, std::error::Error).

use crate::error::{Error, Result};
use crate::graphics_api::GraphicsApi;

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("vkCreateDevice failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("vkCreateDevice failed"));
}

#[test]
fn test_out_of_memory_display() {
    let err = Error::OutOfMemory;
    assert_eq!(format!("{}", err), "Out of GPU memory");
}

#[test]
fn test_invalid_resource_display() {
    let err = Error::InvalidResource("zero-sized buffer".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Invalid resource"));
    assert!(display.contains("zero-sized buffer"));
}

#[test]
fn test_initialization_failed_display() {
    let err = Error::InitializationFailed("no adapter".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Initialization failed"));
    assert!(display.contains("no adapter"));
}

#[test]
fn test_api_unavailable_display_uses_api_name() {
    let err = Error::ApiUnavailable(GraphicsApi::DirectX11);
    assert_eq!(format!("{}", err), "Graphics API unavailable: DirectX 11");
}

#[test]
fn test_lifecycle_errors_display() {
    assert_eq!(format!("{}", Error::AlreadyInitialized), "Render context already initialized");
    assert_eq!(format!("{}", Error::NotInitialized), "Render context not initialized");
    assert_eq!(format!("{}", Error::FrameInProgress), "A frame is already being recorded");
    assert_eq!(format!("{}", Error::SwapchainOutOfDate), "Swapchain out of date");
}

#[test]
fn test_shader_compilation_display() {
    let err = Error::ShaderCompilation("0:3: syntax error".to_string());
    let display = format!("{}", err);
    assert!(display.starts_with("Shader compilation failed"));
    assert!(display.contains("syntax error"));
}

// ============================================================================
// ERROR TRAIT IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_error_is_std_error() {
    let err = Error::OutOfMemory;
    let _: &dyn std::error::Error = &err;
}

#[test]
fn test_error_debug() {
    let debug = format!("{:?}", Error::BackendError("x".to_string()));
    assert!(debug.contains("BackendError"));

    let debug = format!("{:?}", Error::ApiUnavailable(GraphicsApi::Vulkan));
    assert!(debug.contains("ApiUnavailable"));
    assert!(debug.contains("Vulkan"));
}

#[test]
fn test_error_clone_and_eq() {
    let err1 = Error::InvalidResource("texture".to_string());
    let err2 = err1.clone();
    assert_eq!(err1, err2);
    assert_ne!(err1, Error::OutOfMemory);
}

// ============================================================================
// RESULT ALIAS
// ============================================================================

#[test]
fn test_result_question_mark_propagation() {
    fn inner() -> Result<u32> {
        Err(Error::SwapchainOutOfDate)
    }

    fn outer() -> Result<u32> {
        let value = inner()?;
        Ok(value + 1)
    }

    assert_eq!(outer(), Err(Error::SwapchainOutOfDate));
}
