/*!
# Fresh Render - Direct3D 12 Backend

Direct3D 12 implementation of the Fresh render context, built on the
`windows` crate. Frames are double-buffered: each slot has its own command
allocator and fence value, and the CPU never resets an allocator before the
fence of its last submission has been observed signaled.

The backend only exists on Windows; elsewhere the crate compiles to its
platform-independent helpers and [`register`] does nothing.
*/

mod d3d12_util;

#[cfg(windows)]
mod d3d12_buffer;
#[cfg(windows)]
mod d3d12_context;
#[cfg(windows)]
mod d3d12_device;
#[cfg(windows)]
mod d3d12_fence;
#[cfg(windows)]
mod d3d12_shader;
#[cfg(windows)]
mod d3d12_texture;

#[cfg(windows)]
pub use d3d12_context::D3D12RenderContext;
pub use d3d12_util::{
    fence_wait_status, present_interval, texture_upload_pitch, DescriptorSlots, BACK_BUFFER_COUNT,
    CONSTANT_BUFFER_ALIGNMENT, ROOT_CONSTANT_WORDS, SRV_HEAP_CAPACITY, WAIT_SIGNALED,
};

/// Register the Direct3D 12 backend with the render context factory
#[cfg(windows)]
pub fn register() {
    use fresh_render::fresh::{register_backend, GraphicsApi, RenderContext};

    register_backend(GraphicsApi::DirectX12, |config| {
        Ok(Box::new(D3D12RenderContext::new(config.clone())) as Box<dyn RenderContext>)
    });
}

/// Direct3D 12 is Windows-only; nothing to register
#[cfg(not(windows))]
pub fn register() {
    fresh_render::engine_debug!(d3d12_util::SOURCE, "Direct3D 12 backend not built for this platform");
}
