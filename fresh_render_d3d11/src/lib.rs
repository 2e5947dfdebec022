/*!
# Fresh Render - Direct3D 11 Backend

Direct3D 11 implementation of the Fresh render context, built on the
`windows` crate. The backend only exists on Windows; on other targets the
crate compiles to its platform-independent helpers and [`register`] does
nothing (the factory refuses DirectX there anyway).

Besides the [`RenderContext`](fresh_render::fresh::RenderContext) surface,
[`D3D11RenderContext`] draws chunk meshes directly through
`ChunkMeshRenderer`.
*/

mod d3d11_util;

#[cfg(windows)]
mod d3d11_buffer;
#[cfg(windows)]
mod d3d11_context;
#[cfg(windows)]
mod d3d11_shader;
#[cfg(windows)]
mod d3d11_texture;

#[cfg(windows)]
pub use d3d11_context::D3D11RenderContext;
pub use d3d11_util::{constant_buffer_width, present_interval, texture_row_pitch, BACK_BUFFER_COUNT};

/// Register the Direct3D 11 backend with the render context factory
#[cfg(windows)]
pub fn register() {
    use fresh_render::fresh::{register_backend, GraphicsApi, RenderContext};

    register_backend(GraphicsApi::DirectX11, |config| {
        Ok(Box::new(D3D11RenderContext::new(config.clone())) as Box<dyn RenderContext>)
    });
}

/// Direct3D 11 is Windows-only; nothing to register
#[cfg(not(windows))]
pub fn register() {
    fresh_render::engine_debug!(d3d11_util::SOURCE, "Direct3D 11 backend not built for this platform");
}
