/// Buffer - OpenGL implementation of RenderBuffer trait

use fresh_render::fresh::pacing::TrackedResource;
use fresh_render::fresh::resource::{
    validate_buffer_request, validate_buffer_update, BufferKind, MeshVertex, NativeHandle, RenderBuffer,
};
use fresh_render::fresh::{Error, Result};
use fresh_render::engine_err;
use glow::HasContext;
use std::rc::Rc;

use crate::gl_error::{check_gl_errors, SOURCE};

/// Uniform block binding point used by `bind`
pub const UNIFORM_BINDING: u32 = 0;

/// Bind target of a buffer kind
pub fn buffer_target(kind: BufferKind) -> u32 {
    match kind {
        BufferKind::Vertex => glow::ARRAY_BUFFER,
        BufferKind::Index => glow::ELEMENT_ARRAY_BUFFER,
        BufferKind::Uniform => glow::UNIFORM_BUFFER,
    }
}

/// Target a buffer is bound to while its storage is written
///
/// Binding ELEMENT_ARRAY_BUFFER would replace the index buffer of the bound
/// vertex array, so uploads of every kind go through the copy target.
pub const UPLOAD_TARGET: u32 = glow::COPY_WRITE_BUFFER;

/// Usage hint of a buffer kind
///
/// Mesh data is uploaded once; uniforms change every frame.
pub fn buffer_usage(kind: BufferKind) -> u32 {
    match kind {
        BufferKind::Vertex | BufferKind::Index => glow::STATIC_DRAW,
        BufferKind::Uniform => glow::DYNAMIC_DRAW,
    }
}

/// OpenGL buffer object
pub struct Buffer {
    gl: Rc<glow::Context>,
    pub(crate) buffer: glow::Buffer,
    kind: BufferKind,
    size: usize,
    _tracked: TrackedResource,
}

impl Buffer {
    /// Create and optionally fill a buffer object
    pub(crate) fn new(
        gl: Rc<glow::Context>,
        kind: BufferKind,
        data: Option<&[u8]>,
        size: usize,
        tracked: TrackedResource,
    ) -> Result<Self> {
        validate_buffer_request(kind, data, size)?;
        let gl_size = i32::try_from(size)
            .map_err(|_| Error::InvalidResource(format!("{:?} buffer of {} bytes is too large", kind, size)))?;

        let usage = buffer_usage(kind);

        let buffer = unsafe {
            let buffer = gl
                .create_buffer()
                .map_err(|e| engine_err!(SOURCE, "glGenBuffers failed: {}", e))?;
            gl.bind_buffer(UPLOAD_TARGET, Some(buffer));
            match data {
                Some(data) => gl.buffer_data_u8_slice(UPLOAD_TARGET, &data[..size], usage),
                None => gl.buffer_data_size(UPLOAD_TARGET, gl_size, usage),
            }
            gl.bind_buffer(UPLOAD_TARGET, None);
            buffer
        };

        if let Err(e) = check_gl_errors(&gl, "glBufferData") {
            unsafe { gl.delete_buffer(buffer) };
            return Err(e);
        }

        Ok(Self {
            gl,
            buffer,
            kind,
            size,
            _tracked: tracked,
        })
    }
}

impl RenderBuffer for Buffer {
    fn kind(&self) -> BufferKind {
        self.kind
    }

    fn size(&self) -> usize {
        self.size
    }

    fn update_data(&self, data: &[u8], offset: usize) -> Result<()> {
        validate_buffer_update(self.size, data.len(), offset)?;
        unsafe {
            self.gl.bind_buffer(UPLOAD_TARGET, Some(self.buffer));
            self.gl.buffer_sub_data_u8_slice(UPLOAD_TARGET, offset as i32, data);
            self.gl.bind_buffer(UPLOAD_TARGET, None);
        }
        check_gl_errors(&self.gl, "glBufferSubData")
    }

    fn bind(&self) {
        unsafe {
            match self.kind {
                BufferKind::Vertex => {
                    self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.buffer));
                    // MeshVertex: location 0 position, location 1 normal
                    let stride = MeshVertex::STRIDE as i32;
                    self.gl.enable_vertex_attrib_array(0);
                    self.gl.vertex_attrib_pointer_f32(
                        0,
                        3,
                        glow::FLOAT,
                        false,
                        stride,
                        MeshVertex::POSITION_OFFSET as i32,
                    );
                    self.gl.enable_vertex_attrib_array(1);
                    self.gl.vertex_attrib_pointer_f32(
                        1,
                        3,
                        glow::FLOAT,
                        false,
                        stride,
                        MeshVertex::NORMAL_OFFSET as i32,
                    );
                }
                BufferKind::Index => self.gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(self.buffer)),
                BufferKind::Uniform => {
                    self.gl
                        .bind_buffer_base(glow::UNIFORM_BUFFER, UNIFORM_BINDING, Some(self.buffer))
                }
            }
        }
    }

    fn unbind(&self) {
        unsafe {
            match self.kind {
                BufferKind::Vertex | BufferKind::Index => self.gl.bind_buffer(buffer_target(self.kind), None),
                BufferKind::Uniform => self.gl.bind_buffer_base(glow::UNIFORM_BUFFER, UNIFORM_BINDING, None),
            }
        }
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::GlObject(self.buffer.0.get())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_buffer(self.buffer);
        }
    }
}

#[cfg(test)]
#[path = "gl_buffer_tests.rs"]
mod tests;
