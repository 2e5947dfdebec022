/*!
# Fresh Render - OpenGL Backend

OpenGL 4.x implementation of the Fresh render context.

Function pointers are loaded with [`glow`] from the GL context the windowing
layer exposes through `RenderWindow::gl_surface`. Call [`register`] once at
startup so `RenderContextFactory::create(GraphicsApi::OpenGL, ..)` can build
a [`GlRenderContext`].
*/

mod gl_buffer;
mod gl_context;
mod gl_error;
mod gl_shader;
mod gl_texture;

pub use gl_context::{GlDeviceInfo, GlRenderContext};
pub use gl_error::{check_gl_version, gl_error_name, MIN_GL_VERSION, TARGET_GL_VERSION};

use fresh_render::fresh::{register_backend, GraphicsApi, RenderContext};

/// Register the OpenGL backend with the render context factory
///
/// # Example
///
/// ```no_run
/// use fresh_render::fresh::{GraphicsApi, RenderConfig, RenderContextFactory};
///
/// fresh_render_opengl::register();
/// let context = RenderContextFactory::create(GraphicsApi::OpenGL, &RenderConfig::default());
/// ```
pub fn register() {
    register_backend(GraphicsApi::OpenGL, |config| {
        Ok(Box::new(GlRenderContext::new(config.clone())) as Box<dyn RenderContext>)
    });
}
