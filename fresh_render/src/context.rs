/// RenderContext trait - the one interface every graphics backend implements

use std::any::Any;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graphics_api::GraphicsApi;
use crate::lifecycle::ContextState;
use crate::resource::{BufferHandle, NativeHandle, ShaderHandle, ShaderSource, TextureHandle};
use crate::window::RenderWindow;

// ============================================================================
// Per-frame state
// ============================================================================

/// Viewport rectangle in pixels, depth range fixed to 0..1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Whole-target rectangle
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Scissor rectangle in pixels
pub type ScissorRect = Viewport;

/// Clear values used by `begin_frame`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
        }
    }
}

/// Reject a zero-sized swapchain
pub fn validate_swapchain_size(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        Err(Error::InvalidResource(format!(
            "swapchain size {}x{}",
            width, height
        )))
    } else {
        Ok(())
    }
}

// ============================================================================
// RenderContext trait
// ============================================================================

/// A live render context bound to one graphics API
///
/// Created by [`crate::factory::RenderContextFactory`], initialized once
/// against a window, then driven frame by frame from a single thread.
///
/// ```text
/// initialize -> (begin_frame -> draw -> end_frame)* -> shutdown
/// ```
///
/// Every failing call logs its reason before returning `Err`.
pub trait RenderContext: Any {
    /// API this context was created for
    fn api(&self) -> GraphicsApi;

    fn state(&self) -> ContextState;

    // ===== LIFECYCLE =====

    /// Create the device, swapchain, depth buffer and default state
    ///
    /// Fails with `AlreadyInitialized` unless the context is Uninitialized.
    /// A failed initialize leaves the context Uninitialized.
    fn initialize(&mut self, window: Arc<dyn RenderWindow>) -> Result<()>;

    /// Drain the GPU and release everything; terminal
    fn shutdown(&mut self);

    /// Start recording a frame
    ///
    /// Resets viewport and scissor to the full swapchain and clears it
    /// with the stored clear values. Returns `SwapchainOutOfDate` when the
    /// swapchain no longer matches the window; call
    /// [`RenderContext::recreate_swapchain`] and retry.
    fn begin_frame(&mut self) -> Result<()>;

    /// Submit and present the recorded frame
    ///
    /// Advances the frame index once whatever the present outcome.
    fn end_frame(&mut self) -> Result<()>;

    /// Block until all submitted GPU work completed
    fn wait_idle(&mut self) -> Result<()>;

    // ===== FRAME STATE =====

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32);

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32);

    /// Store the clear color; clears the bound target now while Recording
    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32);

    /// Store the clear depth; clears the depth buffer now while Recording
    fn clear_depth(&mut self, depth: f32);

    // ===== RESOURCES =====

    /// Create a vertex buffer of `size` bytes, optionally filled from `data`
    fn create_vertex_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle>;

    fn create_index_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle>;

    /// Uniform buffers are updated every frame; backends place them in
    /// CPU-writable memory
    fn create_uniform_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle>;

    /// Create an RGBA8 texture; `data` holds `width * height * 4` bytes
    fn create_texture(&mut self, width: u32, height: u32, data: Option<&[u8]>) -> Result<TextureHandle>;

    fn create_shader(&mut self, vertex: &ShaderSource, fragment: &ShaderSource) -> Result<ShaderHandle>;

    // ===== SWAPCHAIN =====

    /// Rebuild the swapchain and its dependent views at a new size
    ///
    /// Drains the GPU first. Device and pipeline objects are kept.
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()>;

    /// Present into another window from now on
    fn set_viewport_window(&mut self, window: Arc<dyn RenderWindow>) -> Result<()>;

    fn swapchain_width(&self) -> u32;
    fn swapchain_height(&self) -> u32;

    // ===== QUERIES =====

    /// Current slot in the ring of frames in flight
    fn frame_index(&self) -> usize;

    fn frames_in_flight(&self) -> usize;

    /// Backend device (GL: 0, D3D: `ID3D11Device`/`ID3D12Device`, Vulkan: `VkDevice`)
    fn native_device(&self) -> NativeHandle;

    /// Resources created by this context that are still referenced
    fn live_resource_count(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn RenderContext {
    pub fn is_initialized(&self) -> bool {
        matches!(self.state(), ContextState::Initialized | ContextState::Recording)
    }

    /// Concrete backend behind the trait object
    pub fn downcast_ref<T: RenderContext>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: RenderContext>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}
