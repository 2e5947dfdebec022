//! Resource handles shared by all backends
//!
//! A buffer, texture or shader wraps exactly one native GPU object. Handles
//! are reference counted (`Rc<dyn ...>`); the last owner to drop a handle
//! frees the GPU object.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::ffi::c_void;
use std::rc::Rc;

use crate::error::{Error, Result};

/// Number of texture units a shader can sample from
pub const MAX_TEXTURE_UNITS: u32 = 4;

/// Bytes per texel of the RGBA8 textures created by `create_texture`
pub const TEXTURE_BYTES_PER_PIXEL: usize = 4;

/// Backend-native object, exposed through the escape hatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeHandle {
    /// Nothing to expose (object not created yet, or already destroyed)
    Null,
    /// OpenGL object name
    GlObject(u32),
    /// COM interface pointer (Direct3D 11/12); not AddRef'd
    ComPtr(*mut c_void),
    /// Vulkan handle (`ash::vk::Handle::as_raw`)
    Vulkan(u64),
}

impl NativeHandle {
    pub fn is_null(&self) -> bool {
        match self {
            NativeHandle::Null => true,
            NativeHandle::GlObject(name) => *name == 0,
            NativeHandle::ComPtr(ptr) => ptr.is_null(),
            NativeHandle::Vulkan(raw) => *raw == 0,
        }
    }
}

/// What a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
}

/// Shader code in the form a backend consumes
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderSource {
    /// GLSL source (OpenGL)
    Glsl(String),
    /// HLSL source with a `main` entry point (Direct3D 11/12)
    Hlsl(String),
    /// SPIR-V words with a `main` entry point (Vulkan)
    SpirV(Vec<u32>),
}

impl ShaderSource {
    /// Short description used in log lines
    pub fn kind_name(&self) -> &'static str {
        match self {
            ShaderSource::Glsl(_) => "GLSL",
            ShaderSource::Hlsl(_) => "HLSL",
            ShaderSource::SpirV(_) => "SPIR-V",
        }
    }
}

/// Vertex layout of every mesh drawn through the render layer
///
/// Location/semantic 0 is the position, 1 is the normal.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

impl MeshVertex {
    pub const STRIDE: u32 = std::mem::size_of::<MeshVertex>() as u32;
    pub const POSITION_OFFSET: u32 = 0;
    pub const NORMAL_OFFSET: u32 = 12;

    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
        }
    }
}

/// GPU buffer handle
pub trait RenderBuffer {
    fn kind(&self) -> BufferKind;

    /// Size in bytes, fixed at creation
    fn size(&self) -> usize;

    /// Overwrite `data.len()` bytes starting at `offset`
    ///
    /// Never reallocates; the native handle stays the same.
    fn update_data(&self, data: &[u8], offset: usize) -> Result<()>;

    /// Bind for the next draw (vertex/index/uniform slot by kind)
    fn bind(&self);

    fn unbind(&self);

    fn native_handle(&self) -> NativeHandle;
}

/// 2D RGBA8 texture handle
pub trait RenderTexture {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Bind to texture unit `unit` (0..MAX_TEXTURE_UNITS)
    fn bind(&self, unit: u32);

    fn unbind(&self);

    fn native_handle(&self) -> NativeHandle;
}

/// Compiled shader program handle
pub trait RenderShader {
    fn bind(&self);
    fn unbind(&self);

    fn set_uniform_int(&self, name: &str, value: i32);
    fn set_uniform_float(&self, name: &str, value: f32);
    fn set_uniform_vec2(&self, name: &str, value: Vec2);
    fn set_uniform_vec3(&self, name: &str, value: Vec3);
    fn set_uniform_vec4(&self, name: &str, value: Vec4);
    fn set_uniform_mat4(&self, name: &str, value: Mat4);

    fn native_handle(&self) -> NativeHandle;
}

pub type BufferHandle = Rc<dyn RenderBuffer>;
pub type TextureHandle = Rc<dyn RenderTexture>;
pub type ShaderHandle = Rc<dyn RenderShader>;

// ===== REQUEST VALIDATION =====
//
// Shared by every backend so the failure cases behave identically.

/// Check a buffer creation request
pub fn validate_buffer_request(kind: BufferKind, data: Option<&[u8]>, size: usize) -> Result<()> {
    if size == 0 {
        return Err(Error::InvalidResource(format!("{:?} buffer of size 0", kind)));
    }
    if let Some(data) = data {
        if data.len() < size {
            return Err(Error::InvalidResource(format!(
                "{:?} buffer of {} bytes given only {} bytes of data",
                kind,
                size,
                data.len()
            )));
        }
    }
    Ok(())
}

/// Check a texture creation request
pub fn validate_texture_request(width: u32, height: u32, data: Option<&[u8]>) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidResource(format!("texture of size {}x{}", width, height)));
    }
    if let Some(data) = data {
        let needed = width as usize * height as usize * TEXTURE_BYTES_PER_PIXEL;
        if data.len() < needed {
            return Err(Error::InvalidResource(format!(
                "{}x{} RGBA8 texture needs {} bytes, got {}",
                width,
                height,
                needed,
                data.len()
            )));
        }
    }
    Ok(())
}

/// Check an in-place buffer update
pub fn validate_buffer_update(size: usize, data_len: usize, offset: usize) -> Result<()> {
    match offset.checked_add(data_len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::InvalidResource(format!(
            "update of {} bytes at offset {} overflows buffer of {} bytes",
            data_len, offset, size
        ))),
    }
}

/// Check a texture unit index
pub fn validate_texture_unit(unit: u32) -> Result<()> {
    if unit < MAX_TEXTURE_UNITS {
        Ok(())
    } else {
        Err(Error::InvalidResource(format!(
            "texture unit {} out of range (max {})",
            unit,
            MAX_TEXTURE_UNITS - 1
        )))
    }
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
