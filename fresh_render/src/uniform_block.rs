//! CPU-side uniform staging shared by the explicit backends
//!
//! Direct3D and Vulkan have no per-program uniform locations. Shaders on
//! those backends keep their uniforms in a small block that is copied into
//! a constant buffer, root constants or push constants when the shader is
//! bound. Offsets follow HLSL cbuffer / std140 packing: scalars align to 4,
//! vec2 to 8, vec3/vec4/mat4 to 16, and nothing straddles a 16-byte row.

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::error::{Error, Result};

/// Bytes available to a uniform block (the guaranteed push-constant size)
pub const UNIFORM_BLOCK_CAPACITY: usize = 128;

/// A single uniform value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn size(&self) -> usize {
        match self {
            UniformValue::Int(_) | UniformValue::Float(_) => 4,
            UniformValue::Vec2(_) => 8,
            UniformValue::Vec3(_) => 12,
            UniformValue::Vec4(_) => 16,
            UniformValue::Mat4(_) => 64,
        }
    }

    pub fn alignment(&self) -> usize {
        match self {
            UniformValue::Int(_) | UniformValue::Float(_) => 4,
            UniformValue::Vec2(_) => 8,
            UniformValue::Vec3(_) | UniformValue::Vec4(_) | UniformValue::Mat4(_) => 16,
        }
    }

    fn write_to(&self, out: &mut [u8]) {
        match self {
            UniformValue::Int(v) => out.copy_from_slice(&v.to_ne_bytes()),
            UniformValue::Float(v) => out.copy_from_slice(&v.to_ne_bytes()),
            UniformValue::Vec2(v) => out.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec3(v) => out.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec4(v) => out.copy_from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Mat4(m) => out.copy_from_slice(bytemuck::cast_slice(&m.to_cols_array())),
        }
    }
}

/// Named member of a uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMember {
    pub name: String,
    pub offset: usize,
    pub size: usize,
}

/// Named uniform values packed into a byte block
#[derive(Debug, Clone)]
pub struct UniformBlock {
    members: Vec<UniformMember>,
    data: Vec<u8>,
    used: usize,
    fixed_layout: bool,
    dirty: bool,
}

impl UniformBlock {
    /// Block whose layout grows in first-set order
    pub fn packed() -> Self {
        Self {
            members: Vec::new(),
            data: vec![0; UNIFORM_BLOCK_CAPACITY],
            used: 0,
            fixed_layout: false,
            dirty: false,
        }
    }

    /// Block with a layout taken from shader reflection
    ///
    /// Members ending past the capacity are rejected.
    pub fn with_layout(members: Vec<UniformMember>) -> Result<Self> {
        let mut used = 0;
        for member in &members {
            let end = member.offset + member.size;
            if end > UNIFORM_BLOCK_CAPACITY {
                return Err(Error::InvalidResource(format!(
                    "uniform '{}' ends at byte {}, block capacity is {}",
                    member.name, end, UNIFORM_BLOCK_CAPACITY
                )));
            }
            used = used.max(end);
        }
        Ok(Self {
            members,
            data: vec![0; UNIFORM_BLOCK_CAPACITY],
            used,
            fixed_layout: true,
            dirty: false,
        })
    }

    /// Store `value` under `name`
    ///
    /// Returns `Ok(false)` when a reflected layout has no member of that
    /// name; a packed block appends unknown names.
    pub fn set(&mut self, name: &str, value: UniformValue) -> Result<bool> {
        let size = value.size();
        let offset = match self.members.iter().find(|m| m.name == name) {
            Some(member) => {
                if member.size < size {
                    return Err(Error::InvalidResource(format!(
                        "uniform '{}' holds {} bytes, value needs {}",
                        name, member.size, size
                    )));
                }
                member.offset
            }
            None if self.fixed_layout => return Ok(false),
            None => self.append(name, &value)?,
        };

        value.write_to(&mut self.data[offset..offset + size]);
        self.dirty = true;
        Ok(true)
    }

    fn append(&mut self, name: &str, value: &UniformValue) -> Result<usize> {
        let size = value.size();
        let mut offset = align_up(self.used, value.alignment());
        // Keep vectors inside one 16-byte row
        if size <= 16 && (offset % 16) + size > 16 {
            offset = align_up(offset, 16);
        }
        if offset + size > UNIFORM_BLOCK_CAPACITY {
            return Err(Error::InvalidResource(format!(
                "uniform '{}' does not fit: {} + {} > {} bytes",
                name, offset, size, UNIFORM_BLOCK_CAPACITY
            )));
        }
        self.members.push(UniformMember {
            name: name.to_string(),
            offset,
            size,
        });
        self.used = offset + size;
        Ok(offset)
    }

    pub fn member(&self, name: &str) -> Option<&UniformMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn members(&self) -> &[UniformMember] {
        &self.members
    }

    /// Bytes in use, rounded up to a whole 16-byte row
    pub fn bytes(&self) -> &[u8] {
        let len = align_up(self.used, 16).min(UNIFORM_BLOCK_CAPACITY);
        &self.data[..len]
    }

    /// Bytes in use as 32-bit words (root constants)
    pub fn words(&self) -> Vec<u32> {
        self.bytes()
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Whether values changed since the last call
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

#[cfg(test)]
#[path = "uniform_block_tests.rs"]
mod tests;
