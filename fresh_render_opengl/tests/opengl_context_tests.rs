//! Integration tests for GlRenderContext on a real GL context
//!
//! A hidden winit window gets its GL context and surface from glutin, which
//! plays the windowing layer. Every test needs a GL 4.x driver and a display
//! and is marked with #[ignore].
//!
//! Run with: cargo test --test opengl_context_tests -- --ignored --test-threads=1

#![cfg(not(target_os = "macos"))]

use fresh_render::fresh::resource::{NativeHandle, ShaderSource};
use fresh_render::fresh::{ContextState, Error, GlSurface, RenderConfig, RenderContext, RenderWindow};
use fresh_render_opengl::GlRenderContext;
use glow::HasContext;
use glutin::config::ConfigTemplateBuilder;
use glutin::context::{
    ContextApi, ContextAttributesBuilder, GlProfile, NotCurrentGlContext, PossiblyCurrentContext,
    PossiblyCurrentGlContext, Version,
};
use glutin::display::{GetGlDisplay, GlDisplay};
use glutin::surface::{GlSurface as _, Surface, SwapInterval, WindowSurface};
use glutin_winit::{DisplayBuilder, GlWindow};
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};
use serial_test::serial;
use std::ffi::{c_void, CString};
use std::num::NonZeroU32;
use std::sync::Arc;
use winit::event_loop::EventLoop;
use winit::window::Window;

const VERTEX_GLSL: &str = r#"#version 330 core
layout(location = 0) in vec3 position;
uniform mat4 modelViewProj;
void main() {
    gl_Position = modelViewProj * vec4(position, 1.0);
}
"#;

const FRAGMENT_GLSL: &str = r#"#version 330 core
uniform vec4 tint;
out vec4 color;
void main() {
    color = tint;
}
"#;

/// Hidden window with a current GL context, as a host application owns it
struct GlutinWindow {
    surface: Surface<WindowSurface>,
    context: PossiblyCurrentContext,
    window: Window,
}

impl HasWindowHandle for GlutinWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for GlutinWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl RenderWindow for GlutinWindow {
    fn client_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn gl_surface(&self) -> Option<&dyn GlSurface> {
        Some(self)
    }
}

impl GlSurface for GlutinWindow {
    fn get_proc_address(&self, symbol: &str) -> *const c_void {
        match CString::new(symbol) {
            Ok(symbol) => self.context.display().get_proc_address(&symbol),
            Err(_) => std::ptr::null(),
        }
    }

    fn make_current(&self) -> fresh_render::fresh::Result<()> {
        self.context
            .make_current(&self.surface)
            .map_err(|e| Error::InitializationFailed(e.to_string()))
    }

    fn swap_buffers(&self) -> fresh_render::fresh::Result<()> {
        self.surface
            .swap_buffers(&self.context)
            .map_err(|e| Error::BackendError(e.to_string()))
    }

    fn resize(&self, width: u32, height: u32) {
        if let (Some(width), Some(height)) = (NonZeroU32::new(width), NonZeroU32::new(height)) {
            self.surface.resize(&self.context, width, height);
        }
    }

    fn set_swap_interval(&self, vsync: bool) -> fresh_render::fresh::Result<()> {
        let interval = if vsync {
            SwapInterval::Wait(NonZeroU32::MIN)
        } else {
            SwapInterval::DontWait
        };
        self.surface
            .set_swap_interval(&self.context, interval)
            .map_err(|e| Error::BackendError(e.to_string()))
    }
}

fn build_event_loop() -> EventLoop<()> {
    let mut builder = EventLoop::builder();
    #[cfg(windows)]
    winit::platform::windows::EventLoopBuilderExtWindows::with_any_thread(&mut builder, true);
    #[cfg(all(unix, not(target_os = "macos")))]
    winit::platform::x11::EventLoopBuilderExtX11::with_any_thread(&mut builder, true);
    builder.build().unwrap()
}

/// Hidden 800x600 window with a GL 4 core context; the event loop must outlive it
#[allow(deprecated)]
fn create_test_window() -> (Arc<GlutinWindow>, EventLoop<()>) {
    let event_loop = build_event_loop();
    let attrs = Window::default_attributes()
        .with_title("OpenGL Test Window")
        .with_inner_size(winit::dpi::PhysicalSize::new(800, 600))
        .with_visible(false);
    let (window, config) = DisplayBuilder::new()
        .with_window_attributes(Some(attrs))
        .build(&event_loop, ConfigTemplateBuilder::new(), |mut configs| configs.next().unwrap())
        .unwrap();
    let window = window.unwrap();

    let raw_handle = window.window_handle().ok().map(|handle| handle.as_raw());
    let context_attrs = ContextAttributesBuilder::new()
        .with_context_api(ContextApi::OpenGl(Some(Version::new(4, 0))))
        .with_profile(GlProfile::Core)
        .build(raw_handle);
    let display = config.display();
    let not_current = unsafe { display.create_context(&config, &context_attrs) }.unwrap();
    let surface_attrs = window.build_surface_attributes(Default::default()).unwrap();
    let surface = unsafe { display.create_window_surface(&config, &surface_attrs) }.unwrap();
    let context = not_current.make_current(&surface).unwrap();

    (Arc::new(GlutinWindow { surface, context, window }), event_loop)
}

fn create_context() -> (GlRenderContext, Arc<GlutinWindow>, EventLoop<()>) {
    let (window, event_loop) = create_test_window();
    let mut context = GlRenderContext::new(RenderConfig {
        vsync: false,
        ..RenderConfig::default()
    });
    context.initialize(window.clone()).unwrap();
    (context, window, event_loop)
}

fn gl_name(handle: NativeHandle) -> i32 {
    match handle {
        NativeHandle::GlObject(name) => name as i32,
        other => panic!("expected a GL object, got {:?}", other),
    }
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
#[serial]
#[ignore] // Requires GPU
fn test_gl_initialize_and_frame() {
    let (mut context, _window, _event_loop) = create_context();

    assert_eq!(context.state(), ContextState::Initialized);
    assert_eq!(context.swapchain_width(), 800);
    assert_eq!(context.swapchain_height(), 600);
    assert!(context.gl().is_some());
    assert!(context.device_info().major >= 4);

    context.begin_frame().unwrap();
    assert_eq!(context.state(), ContextState::Recording);
    context.clear_color(0.0, 0.0, 0.0, 1.0);
    context.end_frame().unwrap();
    assert_eq!(context.state(), ContextState::Initialized);

    context.shutdown();
    assert_eq!(context.state(), ContextState::ShutDown);
    assert_eq!(context.live_resource_count(), 0);
    assert!(context.gl().is_none());
}

#[test]
#[serial]
#[ignore] // Requires GPU
fn test_gl_initialize_twice_fails() {
    let (mut context, window, _event_loop) = create_context();
    assert!(matches!(context.initialize(window), Err(Error::AlreadyInitialized)));
    assert_eq!(context.state(), ContextState::Initialized);
}

#[test]
#[serial]
#[ignore] // Requires GPU
fn test_gl_begin_frame_twice_is_frame_in_progress() {
    let (mut context, _window, _event_loop) = create_context();
    context.begin_frame().unwrap();
    assert!(matches!(context.begin_frame(), Err(Error::FrameInProgress)));
    assert_eq!(context.state(), ContextState::Recording);
    context.end_frame().unwrap();
}

#[test]
#[serial]
#[ignore] // Requires GPU
fn test_gl_framebuffer_resize_rejected_while_recording() {
    let (mut context, window, _event_loop) = create_context();
    context.begin_frame().unwrap();
    assert!(matches!(context.recreate_swapchain(640, 360), Err(Error::FrameInProgress)));
    assert!(matches!(context.set_viewport_window(window), Err(Error::FrameInProgress)));
    assert_eq!(context.swapchain_width(), 800);
    context.end_frame().unwrap();

    context.recreate_swapchain(640, 360).unwrap();
    assert_eq!(context.swapchain_width(), 640);
    assert_eq!(context.swapchain_height(), 360);
}

// ============================================================================
// RESOURCES
// ============================================================================

#[test]
#[serial]
#[ignore] // Requires GPU
fn test_gl_uniform_write_keeps_bound_program() {
    let (mut context, _window, _event_loop) = create_context();
    let vs = ShaderSource::Glsl(VERTEX_GLSL.to_string());
    let fs = ShaderSource::Glsl(FRAGMENT_GLSL.to_string());
    let drawing = context.create_shader(&vs, &fs).unwrap();
    let other = context.create_shader(&vs, &fs).unwrap();

    drawing.bind();
    other.set_uniform_vec4("tint", fresh_render::glam::Vec4::ONE);
    other.set_uniform_mat4("modelViewProj", fresh_render::glam::Mat4::IDENTITY);

    let gl = context.gl().unwrap();
    let current = unsafe { gl.get_parameter_i32(glow::CURRENT_PROGRAM) };
    assert_eq!(current, gl_name(drawing.native_handle()));
    assert_eq!(unsafe { gl.get_error() }, glow::NO_ERROR);

    drawing.unbind();
    other.set_uniform_vec4("tint", fresh_render::glam::Vec4::ZERO);
    assert_eq!(unsafe { gl.get_parameter_i32(glow::CURRENT_PROGRAM) }, 0);
}

#[test]
#[serial]
#[ignore] // Requires GPU
fn test_gl_index_buffer_upload_keeps_vertex_array_binding() {
    let (mut context, _window, _event_loop) = create_context();
    let indices: Vec<u8> = [0u32, 1, 2].iter().flat_map(|i| i.to_ne_bytes()).collect();
    let bound = context.create_index_buffer(Some(&indices), indices.len()).unwrap();
    bound.bind();

    let uploaded = context.create_index_buffer(Some(&indices), indices.len()).unwrap();
    uploaded.update_data(&indices[..4], 4).unwrap();
    let vertices = context.create_vertex_buffer(None, 72).unwrap();
    vertices.update_data(&[0u8; 24], 0).unwrap();

    let gl = context.gl().unwrap();
    let element_binding = unsafe { gl.get_parameter_i32(glow::ELEMENT_ARRAY_BUFFER_BINDING) };
    assert_eq!(element_binding, gl_name(bound.native_handle()));
    assert_eq!(context.live_resource_count(), 3);
}
