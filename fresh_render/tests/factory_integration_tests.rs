//! Integration tests for RenderContextFactory through the public API
//!
//! Registers a small headless backend the way a backend crate's
//! `register()` does, then creates and drives it through the trait.
//! No GPU required.
//!
//! Run with: cargo test --test factory_integration_tests

use fresh_render::fresh::pacing::{FrameRing, Lifecycle, ResourceTracker};
use fresh_render::fresh::resource::{
    validate_buffer_request, validate_buffer_update, BufferHandle, BufferKind, NativeHandle, RenderBuffer,
    ShaderHandle, ShaderSource, TextureHandle,
};
use fresh_render::fresh::{
    register_backend, unregister_backend, ContextState, Error, GraphicsApi, RenderConfig, RenderContext,
    RenderContextFactory, RenderWindow, Result,
};
use serial_test::serial;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

// ============================================================================
// HEADLESS BACKEND
// ============================================================================

struct HeadlessBuffer {
    kind: BufferKind,
    data: RefCell<Vec<u8>>,
    _tracked: fresh_render::fresh::pacing::TrackedResource,
}

impl RenderBuffer for HeadlessBuffer {
    fn kind(&self) -> BufferKind {
        self.kind
    }
    fn size(&self) -> usize {
        self.data.borrow().len()
    }
    fn update_data(&self, data: &[u8], offset: usize) -> Result<()> {
        let mut storage = self.data.borrow_mut();
        validate_buffer_update(storage.len(), data.len(), offset)?;
        storage[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
    fn bind(&self) {}
    fn unbind(&self) {}
    fn native_handle(&self) -> NativeHandle {
        NativeHandle::Null
    }
}

/// Single-slot context with no swapchain, like an offscreen GL context
struct HeadlessContext {
    lifecycle: Lifecycle,
    ring: FrameRing,
    tracker: ResourceTracker,
    size: (u32, u32),
    vsync: bool,
}

impl HeadlessContext {
    fn new(config: &RenderConfig) -> Self {
        Self {
            lifecycle: Lifecycle::new("fresh::headless"),
            ring: FrameRing::new(1),
            tracker: ResourceTracker::new(),
            size: (0, 0),
            vsync: config.vsync,
        }
    }

    fn buffer(&mut self, kind: BufferKind, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.lifecycle.require_initialized("create_buffer")?;
        validate_buffer_request(kind, data, size)?;
        let bytes = data.map(|d| d[..size].to_vec()).unwrap_or_else(|| vec![0; size]);
        Ok(Rc::new(HeadlessBuffer {
            kind,
            data: RefCell::new(bytes),
            _tracked: self.tracker.track(),
        }))
    }
}

impl RenderContext for HeadlessContext {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::OpenGL
    }
    fn state(&self) -> ContextState {
        self.lifecycle.state()
    }
    fn initialize(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.begin_initialize()?;
        self.size = window.client_size();
        self.lifecycle.mark_initialized();
        Ok(())
    }
    fn shutdown(&mut self) {
        if self.lifecycle.shut_down() {
            self.tracker.warn_leaks("fresh::headless");
        }
    }
    fn begin_frame(&mut self) -> Result<()> {
        self.lifecycle.check_begin_frame()?;
        self.lifecycle.begin_recording();
        Ok(())
    }
    fn end_frame(&mut self) -> Result<()> {
        self.lifecycle.check_end_frame()?;
        self.ring.advance();
        self.lifecycle.end_recording();
        Ok(())
    }
    fn wait_idle(&mut self) -> Result<()> {
        self.lifecycle.require_initialized("wait_idle")
    }
    fn set_viewport(&mut self, _x: i32, _y: i32, _width: u32, _height: u32) {}
    fn set_scissor(&mut self, _x: i32, _y: i32, _width: u32, _height: u32) {}
    fn clear_color(&mut self, _r: f32, _g: f32, _b: f32, _a: f32) {}
    fn clear_depth(&mut self, _depth: f32) {}
    fn create_vertex_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.buffer(BufferKind::Vertex, data, size)
    }
    fn create_index_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.buffer(BufferKind::Index, data, size)
    }
    fn create_uniform_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.buffer(BufferKind::Uniform, data, size)
    }
    fn create_texture(&mut self, _width: u32, _height: u32, _data: Option<&[u8]>) -> Result<TextureHandle> {
        Err(Error::InvalidResource("headless backend has no textures".to_string()))
    }
    fn create_shader(&mut self, _vertex: &ShaderSource, _fragment: &ShaderSource) -> Result<ShaderHandle> {
        Err(Error::ShaderCompilation("headless backend has no shaders".to_string()))
    }
    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        fresh_render::context::validate_swapchain_size(width, height)?;
        self.size = (width, height);
        Ok(())
    }
    fn set_viewport_window(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        let (width, height) = window.client_size();
        self.recreate_swapchain(width, height)
    }
    fn swapchain_width(&self) -> u32 {
        self.size.0
    }
    fn swapchain_height(&self) -> u32 {
        self.size.1
    }
    fn frame_index(&self) -> usize {
        self.ring.index()
    }
    fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }
    fn native_device(&self) -> NativeHandle {
        NativeHandle::Null
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

fn register_headless() {
    register_backend(GraphicsApi::OpenGL, |config| {
        Ok(Box::new(HeadlessContext::new(config)) as Box<dyn RenderContext>)
    });
}

// ============================================================================
// FACTORY TESTS
// ============================================================================

#[test]
#[serial]
fn test_integration_create_passes_config_to_constructor() {
    register_headless();
    let config = RenderConfig {
        vsync: false,
        ..RenderConfig::default()
    };
    let context = RenderContextFactory::create(GraphicsApi::OpenGL, &config).unwrap();
    let headless = context.downcast_ref::<HeadlessContext>().unwrap();
    assert!(!headless.vsync);
    assert_eq!(context.state(), ContextState::Uninitialized);
    unregister_backend(GraphicsApi::OpenGL);
}

#[test]
#[serial]
fn test_integration_config_string_selects_backend() {
    register_headless();
    let api: GraphicsApi = "gl".parse().unwrap();
    let context = RenderContextFactory::create(api, &RenderConfig::default()).unwrap();
    assert_eq!(context.api(), GraphicsApi::OpenGL);
    assert_eq!(context.frames_in_flight(), 1);
    unregister_backend(GraphicsApi::OpenGL);
}

#[test]
#[serial]
fn test_integration_unregistered_backend_refused() {
    unregister_backend(GraphicsApi::Vulkan);
    let result = RenderContextFactory::create(GraphicsApi::Vulkan, &RenderConfig::default());
    assert!(matches!(result, Err(Error::ApiUnavailable(GraphicsApi::Vulkan))));
}

#[cfg(not(windows))]
#[test]
#[serial]
fn test_integration_dx11_unavailable_off_windows() {
    assert!(!RenderContextFactory::is_api_available(GraphicsApi::DirectX11));
    let result = RenderContextFactory::create(GraphicsApi::DirectX11, &RenderConfig::default());
    assert!(matches!(result, Err(Error::ApiUnavailable(GraphicsApi::DirectX11))));
}

#[test]
#[serial]
fn test_integration_buffers_through_trait_object() {
    register_headless();
    let mut context = RenderContextFactory::create(GraphicsApi::OpenGL, &RenderConfig::default()).unwrap();
    // Creation needs an initialized context
    assert!(context.create_vertex_buffer(None, 16).is_err());
    unregister_backend(GraphicsApi::OpenGL);

    let ctx = context.downcast_mut::<HeadlessContext>().unwrap();
    ctx.lifecycle.mark_initialized();

    let data = [7u8; 32];
    let buffer = context.create_vertex_buffer(Some(&data), 32).unwrap();
    buffer.update_data(&data, 0).unwrap();
    assert_eq!(buffer.size(), 32);
    assert_eq!(context.live_resource_count(), 1);
    drop(buffer);
    assert_eq!(context.live_resource_count(), 0);
}
