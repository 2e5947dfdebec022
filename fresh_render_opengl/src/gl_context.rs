/// GlRenderContext - OpenGL 4.x implementation of RenderContext
///
/// The windowing layer owns the GL context and hands it over through
/// [`GlSurface`]; this backend loads function pointers from it, keeps one
/// default VAO bound and draws into framebuffer 0. GL serializes the
/// command stream itself, so there is exactly one frame in flight.

use fresh_render::context::validate_swapchain_size;
use fresh_render::fresh::pacing::{FrameRing, Lifecycle, ResourceTracker};
use fresh_render::fresh::resource::{
    BufferHandle, BufferKind, NativeHandle, ShaderHandle, ShaderSource, TextureHandle,
};
use fresh_render::fresh::{
    ClearValues, ContextState, Error, GlSurface, GraphicsApi, RenderConfig, RenderContext, RenderWindow,
    Result, ScissorRect, Viewport,
};
use fresh_render::{engine_bail, engine_debug, engine_error, engine_info, engine_warn};
use glow::HasContext;
use std::any::Any;
use std::rc::Rc;
use std::sync::Arc;

use crate::gl_buffer::Buffer;
use crate::gl_error::{check_gl_errors, check_gl_version, clear_gl_errors, SOURCE};
use crate::gl_shader::Shader;
use crate::gl_texture::Texture;

/// Driver strings read at initialization
#[derive(Debug, Clone, Default)]
pub struct GlDeviceInfo {
    pub vendor: String,
    pub renderer: String,
    pub version: String,
    pub glsl_version: String,
    pub major: u32,
    pub minor: u32,
}

/// OpenGL render context
pub struct GlRenderContext {
    config: RenderConfig,
    lifecycle: Lifecycle,
    ring: FrameRing,
    tracker: ResourceTracker,

    window: Option<Arc<dyn RenderWindow>>,
    gl: Option<Rc<glow::Context>>,
    default_vao: Option<glow::VertexArray>,
    info: GlDeviceInfo,

    swapchain_size: (u32, u32),
    clear: ClearValues,
    viewport: Viewport,
    scissor: Option<ScissorRect>,
}

impl GlRenderContext {
    /// Create an uninitialized context
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(SOURCE),
            ring: FrameRing::new(1),
            tracker: ResourceTracker::new(),
            window: None,
            gl: None,
            default_vao: None,
            info: GlDeviceInfo::default(),
            swapchain_size: (0, 0),
            clear: ClearValues::default(),
            viewport: Viewport::default(),
            scissor: None,
        }
    }

    /// Loaded GL functions, for engine code issuing its own draw calls
    pub fn gl(&self) -> Option<&glow::Context> {
        self.gl.as_deref()
    }

    pub fn device_info(&self) -> &GlDeviceInfo {
        &self.info
    }

    fn surface(window: &Arc<dyn RenderWindow>) -> Result<&dyn GlSurface> {
        match window.gl_surface() {
            Some(surface) => Ok(surface),
            None => {
                engine_error!(SOURCE, "Window has no GL surface; the OpenGL backend needs one");
                Err(Error::InitializationFailed("window exposes no GL surface".to_string()))
            }
        }
    }

    fn gl_or_err(&self) -> Result<Rc<glow::Context>> {
        self.gl.clone().ok_or(Error::NotInitialized)
    }

    fn read_device_info(gl: &glow::Context) -> GlDeviceInfo {
        let version = gl.version();
        unsafe {
            GlDeviceInfo {
                vendor: gl.get_parameter_string(glow::VENDOR),
                renderer: gl.get_parameter_string(glow::RENDERER),
                version: gl.get_parameter_string(glow::VERSION),
                glsl_version: gl.get_parameter_string(glow::SHADING_LANGUAGE_VERSION),
                major: version.major,
                minor: version.minor,
            }
        }
    }

    /// Default pipeline state: depth LESS, back-face culling, alpha blending
    fn apply_default_state(gl: &glow::Context) {
        unsafe {
            gl.enable(glow::DEPTH_TEST);
            gl.depth_func(glow::LESS);
            gl.enable(glow::CULL_FACE);
            gl.cull_face(glow::BACK);
            gl.front_face(glow::CCW);
            gl.enable(glow::BLEND);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
        }
    }

    fn clear_target(&self, gl: &glow::Context, mask: u32) {
        unsafe {
            if mask & glow::COLOR_BUFFER_BIT != 0 {
                let [r, g, b, a] = self.clear.color;
                gl.clear_color(r, g, b, a);
            }
            if mask & glow::DEPTH_BUFFER_BIT != 0 {
                gl.clear_depth_f64(f64::from(self.clear.depth));
            }
            gl.clear(mask);
        }
    }

    fn create_buffer(&mut self, kind: BufferKind, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.lifecycle.require_initialized("create_buffer")?;
        let gl = self.gl_or_err()?;
        let buffer = Buffer::new(gl, kind, data, size, self.tracker.track())?;
        engine_debug!(SOURCE, "Created {:?} buffer ({} bytes)", kind, size);
        Ok(Rc::new(buffer))
    }

    /// Resize the default framebuffer; GL has no swapchain objects to rebuild
    fn resize_default_framebuffer(&mut self, window: &Arc<dyn RenderWindow>, width: u32, height: u32) -> Result<()> {
        validate_swapchain_size(width, height)?;
        let gl = self.gl_or_err()?;
        unsafe { gl.finish() };
        Self::surface(window)?.resize(width, height);
        self.swapchain_size = (width, height);
        self.viewport = Viewport::full(width, height);
        engine_debug!(SOURCE, "Default framebuffer resized to {}x{}", width, height);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(gl) = self.gl.take() {
            unsafe {
                gl.finish();
                if let Some(vao) = self.default_vao.take() {
                    gl.bind_vertex_array(None);
                    gl.delete_vertex_array(vao);
                }
            }
        }
        self.window = None;
    }
}

impl RenderContext for GlRenderContext {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::OpenGL
    }

    fn state(&self) -> ContextState {
        self.lifecycle.state()
    }

    fn initialize(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.begin_initialize()?;

        let (width, height) = window.client_size();
        validate_swapchain_size(width, height)?;

        let surface = Self::surface(&window)?;
        surface.make_current()?;
        if let Err(e) = surface.set_swap_interval(self.config.vsync) {
            engine_warn!(SOURCE, "Could not set swap interval: {}", e);
        }

        let gl = unsafe { glow::Context::from_loader_function(|symbol| surface.get_proc_address(symbol)) };
        let info = Self::read_device_info(&gl);
        engine_info!(SOURCE, "OpenGL {} ({}, {})", info.version, info.vendor, info.renderer);
        engine_debug!(SOURCE, "GLSL {}", info.glsl_version);
        check_gl_version(info.major, info.minor, gl.version().is_embedded)?;

        let vao = unsafe {
            let vao = gl
                .create_vertex_array()
                .map_err(|e| Error::InitializationFailed(format!("glGenVertexArrays failed: {}", e)))?;
            gl.bind_vertex_array(Some(vao));
            vao
        };
        Self::apply_default_state(&gl);
        if let Err(e) = check_gl_errors(&gl, "initialize") {
            unsafe { gl.delete_vertex_array(vao) };
            return Err(Error::InitializationFailed(e.to_string()));
        }
        clear_gl_errors(&gl);

        self.gl = Some(Rc::new(gl));
        self.default_vao = Some(vao);
        self.info = info;
        self.window = Some(window);
        self.swapchain_size = (width, height);
        self.viewport = Viewport::full(width, height);
        self.lifecycle.mark_initialized();
        engine_info!(SOURCE, "OpenGL render context initialized ({}x{})", width, height);
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.lifecycle.shut_down() {
            self.tracker.warn_leaks(SOURCE);
            self.release();
            engine_info!(SOURCE, "OpenGL render context shut down");
        }
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.lifecycle.check_begin_frame()?;
        let gl = self.gl_or_err()?;
        if let Some(window) = &self.window {
            if window.client_size() != self.swapchain_size {
                return Err(Error::SwapchainOutOfDate);
            }
        }

        let (width, height) = self.swapchain_size;
        self.viewport = Viewport::full(width, height);
        self.scissor = None;
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            gl.viewport(0, 0, width as i32, height as i32);
            gl.disable(glow::SCISSOR_TEST);
        }
        self.clear_target(&gl, glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
        self.lifecycle.begin_recording();
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.lifecycle.check_end_frame()?;
        let window = match &self.window {
            Some(window) => window.clone(),
            None => engine_bail!(SOURCE, "end_frame without a window"),
        };

        let result = Self::surface(&window).and_then(|surface| surface.swap_buffers());
        self.ring.advance();
        self.lifecycle.end_recording();
        if let Err(e) = &result {
            engine_warn!(SOURCE, "Swap buffers failed: {}", e);
        }
        result
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.lifecycle.require_initialized("wait_idle")?;
        let gl = self.gl_or_err()?;
        unsafe { gl.finish() };
        Ok(())
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = Viewport { x, y, width, height };
        if let Some(gl) = &self.gl {
            unsafe { gl.viewport(x, y, width as i32, height as i32) };
        }
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.scissor = Some(ScissorRect { x, y, width, height });
        if let Some(gl) = &self.gl {
            unsafe {
                gl.enable(glow::SCISSOR_TEST);
                gl.scissor(x, y, width as i32, height as i32);
            }
        }
    }

    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear.color = [r, g, b, a];
        if self.lifecycle.is_recording() {
            if let Some(gl) = self.gl.clone() {
                self.clear_target(&gl, glow::COLOR_BUFFER_BIT);
            }
        }
    }

    fn clear_depth(&mut self, depth: f32) {
        self.clear.depth = depth;
        if self.lifecycle.is_recording() {
            if let Some(gl) = self.gl.clone() {
                self.clear_target(&gl, glow::DEPTH_BUFFER_BIT);
            }
        }
    }

    fn create_vertex_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.create_buffer(BufferKind::Vertex, data, size)
    }

    fn create_index_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.create_buffer(BufferKind::Index, data, size)
    }

    fn create_uniform_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.create_buffer(BufferKind::Uniform, data, size)
    }

    fn create_texture(&mut self, width: u32, height: u32, data: Option<&[u8]>) -> Result<TextureHandle> {
        self.lifecycle.require_initialized("create_texture")?;
        let gl = self.gl_or_err()?;
        let texture = Texture::new(gl, width, height, data, self.tracker.track())?;
        engine_debug!(SOURCE, "Created {}x{} texture", width, height);
        Ok(Rc::new(texture))
    }

    fn create_shader(&mut self, vertex: &ShaderSource, fragment: &ShaderSource) -> Result<ShaderHandle> {
        self.lifecycle.require_initialized("create_shader")?;
        let gl = self.gl_or_err()?;
        let shader = Shader::new(gl, vertex, fragment, self.tracker.track())?;
        Ok(Rc::new(shader))
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.lifecycle.require_idle("recreate_swapchain")?;
        let window = self.window.clone().ok_or(Error::NotInitialized)?;
        self.resize_default_framebuffer(&window, width, height)
    }

    fn set_viewport_window(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.require_idle("set_viewport_window")?;
        let (width, height) = window.client_size();
        validate_swapchain_size(width, height)?;
        if let Some(gl) = &self.gl {
            unsafe { gl.finish() };
        }
        // The new surface must share objects with the context the functions were loaded from
        Self::surface(&window)?.make_current()?;
        self.resize_default_framebuffer(&window, width, height)?;
        self.window = Some(window);
        Ok(())
    }

    fn swapchain_width(&self) -> u32 {
        self.swapchain_size.0
    }

    fn swapchain_height(&self) -> u32 {
        self.swapchain_size.1
    }

    fn frame_index(&self) -> usize {
        self.ring.index()
    }

    fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    fn native_device(&self) -> NativeHandle {
        // GL has no device object; the context lives in the windowing layer
        if self.gl.is_some() {
            NativeHandle::GlObject(0)
        } else {
            NativeHandle::Null
        }
    }

    fn live_resource_count(&self) -> usize {
        self.tracker.live_count()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for GlRenderContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
