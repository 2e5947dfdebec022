//! Unit tests for gl_buffer.rs (no GL context required)

use crate::gl_buffer::{buffer_target, buffer_usage, UPLOAD_TARGET};
use fresh_render::fresh::resource::BufferKind;

#[test]
fn test_buffer_targets() {
    assert_eq!(buffer_target(BufferKind::Vertex), glow::ARRAY_BUFFER);
    assert_eq!(buffer_target(BufferKind::Index), glow::ELEMENT_ARRAY_BUFFER);
    assert_eq!(buffer_target(BufferKind::Uniform), glow::UNIFORM_BUFFER);
}

#[test]
fn test_mesh_buffers_are_static() {
    assert_eq!(buffer_usage(BufferKind::Vertex), glow::STATIC_DRAW);
    assert_eq!(buffer_usage(BufferKind::Index), glow::STATIC_DRAW);
}

#[test]
fn test_uniform_buffers_are_dynamic() {
    assert_eq!(buffer_usage(BufferKind::Uniform), glow::DYNAMIC_DRAW);
}

#[test]
fn test_uploads_leave_draw_bindings_alone() {
    for kind in [BufferKind::Vertex, BufferKind::Index, BufferKind::Uniform] {
        assert_ne!(UPLOAD_TARGET, buffer_target(kind), "{:?}", kind);
    }
    assert_ne!(UPLOAD_TARGET, glow::ELEMENT_ARRAY_BUFFER);
}
