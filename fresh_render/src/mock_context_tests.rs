/// Unit tests for MockContext
///
/// Exercises the RenderContext contract on the shared pacing primitives:
/// state machine, ring wraparound, fence gating, resource semantics and
/// swapchain rebuilds.

use crate::context::{RenderContext, Viewport};
use crate::error::Error;
use crate::lifecycle::ContextState;
use crate::mock_context::*;
use crate::resource::{BufferKind, NativeHandle, RenderBuffer, RenderShader, RenderTexture, ShaderSource};
use glam::Mat4;
use std::sync::Arc;

fn initialized_context() -> (MockContext, Arc<MockWindow>) {
    let mut context = MockContext::new();
    let window = MockWindow::new(800, 600);
    context.initialize(window.clone()).unwrap();
    (context, window)
}

fn run_frame(context: &mut MockContext) {
    context.begin_frame().unwrap();
    context.end_frame().unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_initialize_sizes_swapchain_to_window() {
    let (context, _window) = initialized_context();
    assert_eq!(context.state(), ContextState::Initialized);
    assert_eq!(context.swapchain_width(), 800);
    assert_eq!(context.swapchain_height(), 600);
}

#[test]
fn test_second_initialize_fails_and_keeps_state() {
    let (mut context, window) = initialized_context();
    run_frame(&mut context);
    let frame_index = context.frame_index();

    let result = context.initialize(window);
    assert_eq!(result, Err(Error::AlreadyInitialized));
    assert_eq!(context.state(), ContextState::Initialized);
    assert_eq!(context.frame_index(), frame_index);
    assert_eq!(context.swapchain_width(), 800);
}

#[test]
fn test_failed_initialize_stays_uninitialized() {
    let mut context = MockContext::new();
    context.fail_device_creation = true;
    assert!(context.initialize(MockWindow::new(800, 600)).is_err());
    assert_eq!(context.state(), ContextState::Uninitialized);
    assert_eq!(context.native_device(), NativeHandle::Null);
}

#[test]
fn test_initialize_with_zero_sized_window_fails() {
    let mut context = MockContext::new();
    assert!(context.initialize(MockWindow::new(0, 600)).is_err());
    assert_eq!(context.state(), ContextState::Uninitialized);
}

#[test]
fn test_shutdown_is_terminal() {
    let (mut context, window) = initialized_context();
    context.shutdown();
    assert_eq!(context.state(), ContextState::ShutDown);
    assert!(context.initialize(window).is_err());
    assert_eq!(context.begin_frame(), Err(Error::NotInitialized));
}

#[test]
fn test_shutdown_on_uninitialized_context() {
    let mut context = MockContext::new();
    context.shutdown();
    assert_eq!(context.state(), ContextState::ShutDown);
}

#[test]
fn test_frame_operations_before_initialize() {
    let mut context = MockContext::new();
    assert_eq!(context.begin_frame(), Err(Error::NotInitialized));
    assert_eq!(context.end_frame(), Err(Error::NotInitialized));
    assert_eq!(context.wait_idle(), Err(Error::NotInitialized));
    assert!(context.create_vertex_buffer(None, 16).is_err());
}

#[test]
fn test_begin_frame_twice_is_frame_in_progress() {
    let (mut context, _window) = initialized_context();
    context.begin_frame().unwrap();
    assert_eq!(context.begin_frame(), Err(Error::FrameInProgress));
    assert_eq!(context.state(), ContextState::Recording);
}

#[test]
fn test_end_frame_without_begin_does_not_advance() {
    let (mut context, _window) = initialized_context();
    assert!(context.end_frame().is_err());
    assert_eq!(context.frame_index(), 0);
    assert_eq!(context.presented_frames, 0);
}

// ============================================================================
// Frame ring & fences
// ============================================================================

#[test]
fn test_frame_index_wraps_after_ring_size_frames() {
    let (mut context, _window) = initialized_context();
    let n = context.frames_in_flight();
    assert_eq!(n, 2);
    for _ in 0..n {
        run_frame(&mut context);
    }
    assert_eq!(context.frame_index() % n, 0);

    for _ in 0..(n * 5) {
        run_frame(&mut context);
    }
    assert_eq!(context.frame_index(), 0);
    assert_eq!(context.presented_frames, (n * 6) as u64);
}

#[test]
fn test_slots_never_reused_early_with_slow_gpu() {
    // GPU finishes work three submissions late
    let mut context = MockContext::with_gpu_latency(3);
    context.initialize(MockWindow::new(320, 240)).unwrap();
    for _ in 0..50 {
        run_frame(&mut context);
    }
    assert_eq!(context.reuse_violations, 0);
    assert!(!context.gpu.waits.is_empty());
}

#[test]
fn test_no_waits_when_gpu_keeps_up() {
    let mut context = MockContext::with_gpu_latency(0);
    context.initialize(MockWindow::new(320, 240)).unwrap();
    for _ in 0..10 {
        run_frame(&mut context);
    }
    assert!(context.gpu.waits.is_empty());
    assert_eq!(context.reuse_violations, 0);
}

#[test]
fn test_present_failure_still_advances() {
    let (mut context, _window) = initialized_context();
    context.begin_frame().unwrap();
    context.fail_next_present = true;
    assert_eq!(context.end_frame(), Err(Error::SwapchainOutOfDate));
    assert_eq!(context.frame_index(), 1);
    assert_eq!(context.state(), ContextState::Initialized);
}

#[test]
fn test_wait_idle_between_frames() {
    let (mut context, _window) = initialized_context();
    run_frame(&mut context);
    context.wait_idle().unwrap();
    run_frame(&mut context);
    assert_eq!(context.reuse_violations, 0);
}

// ============================================================================
// Frame state
// ============================================================================

#[test]
fn test_begin_frame_resets_viewport_and_scissor() {
    let (mut context, _window) = initialized_context();
    context.begin_frame().unwrap();
    context.set_viewport(10, 20, 100, 50);
    context.set_scissor(0, 0, 64, 64);
    context.end_frame().unwrap();

    context.begin_frame().unwrap();
    assert_eq!(context.viewport, Viewport::full(800, 600));
    assert_eq!(context.scissor, Viewport::full(800, 600));
}

#[test]
fn test_clear_values_are_used_by_next_begin_frame() {
    let (mut context, _window) = initialized_context();
    context.clear_color(0.2, 0.3, 0.4, 1.0);
    context.clear_depth(0.5);
    context.begin_frame().unwrap();
    assert!(context.commands.contains(&MockCommand::ClearColor([0.2, 0.3, 0.4, 1.0])));
    assert!(context.commands.contains(&MockCommand::ClearDepth(0.5)));
}

#[test]
fn test_clear_while_recording_clears_immediately() {
    let (mut context, _window) = initialized_context();
    context.begin_frame().unwrap();
    let recorded = context.commands.len();
    context.clear_color(1.0, 0.0, 0.0, 1.0);
    assert_eq!(context.commands.len(), recorded + 1);
    assert_eq!(context.commands.last(), Some(&MockCommand::ClearColor([1.0, 0.0, 0.0, 1.0])));
    assert_eq!(context.clear_values().color, [1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn test_setters_outside_frame_record_nothing() {
    let (mut context, _window) = initialized_context();
    context.set_viewport(0, 0, 10, 10);
    context.clear_color(1.0, 1.0, 1.0, 1.0);
    assert!(context.commands.is_empty());
}

// ============================================================================
// Swapchain
// ============================================================================

#[test]
fn test_recreate_swapchain_reports_new_size() {
    let (mut context, _window) = initialized_context();
    run_frame(&mut context);
    context.recreate_swapchain(1920, 1080).unwrap();
    assert_eq!(context.swapchain_width(), 1920);
    assert_eq!(context.swapchain_height(), 1080);
    assert_eq!(context.frame_index(), 0);
}

#[test]
fn test_recreate_swapchain_rejects_zero_size() {
    let (mut context, _window) = initialized_context();
    assert!(context.recreate_swapchain(0, 1080).is_err());
    assert!(context.recreate_swapchain(1920, 0).is_err());
    assert_eq!(context.swapchain_width(), 800);
    assert_eq!(context.swapchain_rebuilds, 0);
}

#[test]
fn test_window_resize_makes_begin_frame_out_of_date() {
    let (mut context, window) = initialized_context();
    window.resize(1024, 768);
    assert_eq!(context.begin_frame(), Err(Error::SwapchainOutOfDate));
    assert_eq!(context.state(), ContextState::Initialized);

    context.recreate_swapchain(1024, 768).unwrap();
    context.begin_frame().unwrap();
    assert_eq!(context.viewport, Viewport::full(1024, 768));
}

#[test]
fn test_stale_present_recovers_after_recreate() {
    let (mut context, _window) = initialized_context();
    context.mark_swapchain_stale();
    assert_eq!(context.begin_frame(), Err(Error::SwapchainOutOfDate));
    context.recreate_swapchain(800, 600).unwrap();
    run_frame(&mut context);
}

#[test]
fn test_set_viewport_window_switches_target() {
    let (mut context, _window) = initialized_context();
    let panel = MockWindow::new(400, 300);
    context.set_viewport_window(panel.clone()).unwrap();
    assert_eq!(context.swapchain_width(), 400);
    assert_eq!(context.swapchain_height(), 300);

    panel.resize(500, 300);
    assert_eq!(context.begin_frame(), Err(Error::SwapchainOutOfDate));
}

#[test]
fn test_swapchain_rebuild_rejected_while_recording() {
    let (mut context, _window) = initialized_context();
    context.begin_frame().unwrap();

    assert_eq!(context.recreate_swapchain(1024, 768), Err(Error::FrameInProgress));
    let panel = MockWindow::new(400, 300);
    assert_eq!(context.set_viewport_window(panel), Err(Error::FrameInProgress));
    assert_eq!(context.state(), ContextState::Recording);
    assert_eq!(context.swapchain_width(), 800);
    assert_eq!(context.swapchain_rebuilds, 0);

    context.end_frame().unwrap();
    context.recreate_swapchain(1024, 768).unwrap();
}

// ============================================================================
// Resources
// ============================================================================

#[test]
fn test_buffer_update_keeps_size_and_handle() {
    let (mut context, _window) = initialized_context();
    let data = [1u8; 64];
    let buffer = context.create_vertex_buffer(Some(&data), 64).unwrap();
    let handle = buffer.native_handle();

    buffer.update_data(&data, 0).unwrap();
    assert_eq!(buffer.size(), 64);
    assert_eq!(buffer.native_handle(), handle);
    assert_eq!(buffer.kind(), BufferKind::Vertex);
}

#[test]
fn test_buffer_update_out_of_range_fails() {
    let (mut context, _window) = initialized_context();
    let buffer = context.create_uniform_buffer(None, 16).unwrap();
    assert!(buffer.update_data(&[0u8; 8], 12).is_err());
    assert!(buffer.update_data(&[0u8; 17], 0).is_err());
    assert!(buffer.update_data(&[0u8; 4], 12).is_ok());
}

#[test]
fn test_buffer_creation_rejects_bad_requests() {
    let (mut context, _window) = initialized_context();
    assert!(context.create_vertex_buffer(None, 0).is_err());
    assert!(context.create_index_buffer(Some(&[0u8; 4]), 8).is_err());
    assert_eq!(context.live_resource_count(), 0);
}

#[test]
fn test_texture_creation() {
    let (mut context, _window) = initialized_context();
    let pixels = vec![255u8; 4 * 4 * 4];
    let texture = context.create_texture(4, 4, Some(&pixels)).unwrap();
    assert_eq!((texture.width(), texture.height()), (4, 4));
    assert!(context.create_texture(0, 4, None).is_err());
    assert!(context.create_texture(4, 4, Some(&pixels[..10])).is_err());
}

#[test]
fn test_shader_creation_rejects_empty_stage() {
    let (mut context, _window) = initialized_context();
    let vs = ShaderSource::Glsl("void main() {}".to_string());
    let empty = ShaderSource::Glsl(String::new());
    assert!(matches!(context.create_shader(&vs, &empty), Err(Error::ShaderCompilation(_))));

    let shader = context.create_shader(&vs, &vs).unwrap();
    shader.set_uniform_mat4("modelViewProj", Mat4::IDENTITY);
    shader.bind();
}

#[test]
fn test_live_resources_tracked_until_dropped() {
    let (mut context, _window) = initialized_context();
    let buffer = context.create_vertex_buffer(None, 32).unwrap();
    let texture = context.create_texture(2, 2, None).unwrap();
    let shared = buffer.clone();
    assert_eq!(context.live_resource_count(), 2);

    drop(buffer);
    assert_eq!(context.live_resource_count(), 2);
    drop(shared);
    drop(texture);
    assert_eq!(context.live_resource_count(), 0);
}

#[test]
fn test_clear_frame_then_shutdown_leaves_nothing_alive() {
    let (mut context, _window) = initialized_context();
    {
        let _buffer = context.create_vertex_buffer(None, 32).unwrap();
    }
    context.begin_frame().unwrap();
    context.clear_color(0.0, 0.0, 0.0, 1.0);
    context.end_frame().unwrap();
    context.shutdown();
    assert_eq!(context.live_resource_count(), 0);
}

// ============================================================================
// Downcast
// ============================================================================

#[test]
fn test_downcast_through_trait_object() {
    let mut boxed: Box<dyn RenderContext> = Box::new(MockContext::new());
    assert!(boxed.downcast_ref::<MockContext>().is_some());
    boxed.downcast_mut::<MockContext>().unwrap().fail_next_present = true;
    assert!(!boxed.is_initialized());
}
