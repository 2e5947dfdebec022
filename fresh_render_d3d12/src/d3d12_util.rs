/// Platform-independent helpers of the Direct3D 12 backend

use fresh_render::fresh::resource::ShaderSource;
use fresh_render::fresh::{Error, Result};
use fresh_render::engine_error;

pub(crate) const SOURCE: &str = "fresh::d3d12";

/// Shader-visible SRV descriptors available to textures
pub const SRV_HEAP_CAPACITY: u32 = 256;

/// 32-bit root constants at b0 (128 bytes, the uniform block capacity)
pub const ROOT_CONSTANT_WORDS: u32 = 32;

/// Root parameter indices of the shared root signature
pub const ROOT_PARAM_CONSTANTS: u32 = 0;
pub const ROOT_PARAM_FIRST_TEXTURE: u32 = 1;
pub const ROOT_PARAM_UNIFORM_BUFFER: u32 = 5;

/// Constant buffer views address 256-byte aligned ranges
pub const CONSTANT_BUFFER_ALIGNMENT: usize = 256;

/// Identity swizzle of a shader resource view
pub const DEFAULT_SHADER_4_COMPONENT_MAPPING: u32 = shader_4_component_mapping(0, 1, 2, 3);

/// Encode an SRV component swizzle (each source 0..=3 picks r/g/b/a)
pub const fn shader_4_component_mapping(r: u32, g: u32, b: u32, a: u32) -> u32 {
    (r & 7) | ((g & 7) << 3) | ((b & 7) << 6) | ((a & 7) << 9) | (1 << 12)
}

/// `WaitForSingleObject` result of a signaled handle
pub const WAIT_SIGNALED: u32 = 0;

/// Outcome of an event wait on a fence
///
/// Only a signaled event with the fence at or past `value` counts as
/// completed; a failed, abandoned or timed-out wait is an error.
pub fn fence_wait_status(status: u32, completed: u64, value: u64) -> Result<()> {
    if status != WAIT_SIGNALED {
        engine_error!(SOURCE, "Wait for fence value {} returned {:#x}", value, status);
        return Err(Error::BackendError(format!(
            "fence wait for {} returned {:#x}",
            value, status
        )));
    }
    if completed < value {
        engine_error!(SOURCE, "Fence event fired at {} while waiting for {}", completed, value);
        return Err(Error::BackendError(format!(
            "fence at {} after waiting for {}",
            completed, value
        )));
    }
    Ok(())
}

/// Row pitch of a texture upload buffer (rows start 256-byte aligned)
pub fn texture_upload_pitch(width: u32) -> u32 {
    (width * 4).div_ceil(256) * 256
}

/// Back buffers of the flip-model swapchain, one per frame in flight
pub const BACK_BUFFER_COUNT: u32 = 2;

/// Sync interval handed to `Present`
pub fn present_interval(vsync: bool) -> u32 {
    if vsync {
        1
    } else {
        0
    }
}

/// HLSL text of a stage, rejecting sources meant for other backends
pub fn hlsl_source<'a>(stage: &'a ShaderSource, stage_name: &str) -> Result<&'a str> {
    match stage {
        ShaderSource::Hlsl(source) => Ok(source),
        other => {
            engine_error!(
                SOURCE,
                "{} shader given {} source, the Direct3D 12 backend takes HLSL",
                stage_name,
                other.kind_name()
            );
            Err(Error::ShaderCompilation(format!(
                "{} stage: expected HLSL, got {}",
                stage_name,
                other.kind_name()
            )))
        }
    }
}

/// Compiler or serializer message from a blob, up to the first NUL
pub fn blob_message(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

// ============================================================================
// SRV heap slots
// ============================================================================

/// Slot allocator of the shader-visible SRV heap
///
/// Freed slots are reused before the heap grows.
#[derive(Debug, Clone)]
pub struct DescriptorSlots {
    capacity: u32,
    next: u32,
    free: Vec<u32>,
}

impl DescriptorSlots {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            next: 0,
            free: Vec::new(),
        }
    }

    /// Take a slot; None when the heap is full
    pub fn allocate(&mut self) -> Option<u32> {
        if let Some(slot) = self.free.pop() {
            return Some(slot);
        }
        if self.next < self.capacity {
            self.next += 1;
            Some(self.next - 1)
        } else {
            None
        }
    }

    pub fn release(&mut self, slot: u32) {
        if slot < self.next && !self.free.contains(&slot) {
            self.free.push(slot);
        }
    }

    pub fn in_use(&self) -> u32 {
        self.next - self.free.len() as u32
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

#[cfg(test)]
#[path = "d3d12_util_tests.rs"]
mod tests;
