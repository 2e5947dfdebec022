/// Platform-independent helpers of the Direct3D 11 backend

use fresh_render::fresh::resource::ShaderSource;
use fresh_render::fresh::{Error, Result};
use fresh_render::engine_error;

pub(crate) const SOURCE: &str = "fresh::d3d11";

/// Swapchain buffers (FLIP_DISCARD needs at least two)
pub const BACK_BUFFER_COUNT: u32 = 2;

/// Bytes of the constant buffer every shader binds at b0
pub const CONSTANT_BUFFER_SIZE: usize = 128;

/// Register of a shader's own uniform constants (b0)
pub const SHADER_CONSTANTS_SLOT: u32 = 0;

/// Register of a bound uniform buffer (b1, as on Direct3D 12)
pub const UNIFORM_BUFFER_SLOT: u32 = 1;

/// Sync interval handed to `Present`
pub fn present_interval(vsync: bool) -> u32 {
    if vsync {
        1
    } else {
        0
    }
}

/// Row pitch of an RGBA8 upload
pub fn texture_row_pitch(width: u32) -> u32 {
    width * 4
}

/// Constant buffers are sized in whole 16-byte registers
pub fn constant_buffer_width(size: usize) -> usize {
    size.div_ceil(16).max(1) * 16
}

/// HLSL text of a stage, rejecting sources meant for other backends
pub fn hlsl_source<'a>(stage: &'a ShaderSource, stage_name: &str) -> Result<&'a str> {
    match stage {
        ShaderSource::Hlsl(source) => Ok(source),
        other => {
            engine_error!(
                SOURCE,
                "{} shader given {} source, the Direct3D 11 backend takes HLSL",
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

/// Compiler output of a failed `D3DCompile`, trimmed for the log
pub fn compile_log(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

#[cfg(test)]
#[path = "d3d11_util_tests.rs"]
mod tests;
