/// Helpers of the Vulkan backend that need no device

use ash::vk;
use fresh_render::engine_error;
use fresh_render::fresh::resource::{ShaderSource, MAX_TEXTURE_UNITS, UNIFORM_BLOCK_CAPACITY};
use fresh_render::fresh::{Error, Result};

pub(crate) const SOURCE: &str = "fresh::vulkan";

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Push-constant range shared by the vertex and fragment stages
pub const PUSH_CONSTANT_SIZE: u32 = UNIFORM_BLOCK_CAPACITY as u32;

/// Oldest device API the backend runs on (timeline semaphores are core in 1.2)
pub const MIN_DEVICE_API_VERSION: u32 = vk::API_VERSION_1_2;

/// Combined image sampler sets allocated for textures
pub const TEXTURE_DESCRIPTOR_CAPACITY: u32 = 256;

/// Dynamic uniform buffer sets allocated for uniform buffers
pub const UNIFORM_DESCRIPTOR_CAPACITY: u32 = 256;

/// Set holding the bound uniform buffer (binding 0)
pub const UNIFORM_BUFFER_SET: u32 = 0;

/// Set of texture unit 0; unit n uses set `TEXTURE_SET_BASE + n`
pub const TEXTURE_SET_BASE: u32 = 1;

/// Descriptor sets in the shared pipeline layout
pub const PIPELINE_SET_COUNT: u32 = TEXTURE_SET_BASE + MAX_TEXTURE_UNITS;

/// Color formats the render pass is built for, in order of preference
pub const PREFERRED_SURFACE_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

/// Depth attachment format
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Present mode for the vsync setting among the modes the surface offers
///
/// FIFO is the only mode every surface supports.
pub fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Preferred UNORM surface format, or the first one offered
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    PREFERRED_SURFACE_FORMATS
        .iter()
        .find_map(|preferred| available.iter().find(|f| f.format == *preferred))
        .or_else(|| available.first())
        .copied()
}

/// Swapchain extent for the requested size within the surface limits
///
/// A current extent of `u32::MAX` means the window size decides.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// One image more than the minimum, within the maximum (0 = unbounded)
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Words of a SPIR-V binary read from disk
///
/// The byte length must be a multiple of 4 and the first word the SPIR-V
/// magic number (either byte order).
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::ShaderCompilation(format!(
            "SPIR-V size {} is not a multiple of 4 bytes",
            bytes.len()
        )));
    }
    if bytes.len() < 20 {
        return Err(Error::ShaderCompilation(format!(
            "SPIR-V binary of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    let first = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let decode: fn([u8; 4]) -> u32 = if first == SPIRV_MAGIC {
        u32::from_le_bytes
    } else if first.swap_bytes() == SPIRV_MAGIC {
        u32::from_be_bytes
    } else {
        return Err(Error::ShaderCompilation(format!(
            "bad SPIR-V magic number {:#010x}",
            first
        )));
    };
    Ok(bytes
        .chunks_exact(4)
        .map(|c| decode([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// SPIR-V words of a stage, rejecting sources meant for other backends
pub fn spirv_source<'a>(stage: &'a ShaderSource, stage_name: &str) -> Result<&'a [u32]> {
    match stage {
        ShaderSource::SpirV(words) => {
            if words.first() != Some(&SPIRV_MAGIC) {
                engine_error!(SOURCE, "{} shader is not a SPIR-V module", stage_name);
                return Err(Error::ShaderCompilation(format!(
                    "{} stage: missing SPIR-V magic number",
                    stage_name
                )));
            }
            Ok(words)
        }
        other => {
            engine_error!(
                SOURCE,
                "{} shader given {} source, the Vulkan backend takes SPIR-V",
                stage_name,
                other.kind_name()
            );
            Err(Error::ShaderCompilation(format!(
                "{} stage: expected SPIR-V, got {}",
                stage_name,
                other.kind_name()
            )))
        }
    }
}

/// "major.minor.patch" of a packed Vulkan version
pub fn version_string(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

#[cfg(test)]
#[path = "vulkan_util_tests.rs"]
mod tests;
