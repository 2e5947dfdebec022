/// GL error checks and version requirements

use fresh_render::fresh::{Error, Result};
use fresh_render::{engine_error, engine_warn};
use glow::HasContext;

pub(crate) const SOURCE: &str = "fresh::gl";

/// Lowest GL version the backend runs on
pub const MIN_GL_VERSION: (u32, u32) = (4, 0);

/// GL version the backend is written against
pub const TARGET_GL_VERSION: (u32, u32) = (4, 5);

/// Name of a `glGetError` code
pub fn gl_error_name(code: u32) -> &'static str {
    match code {
        glow::NO_ERROR => "GL_NO_ERROR",
        glow::INVALID_ENUM => "GL_INVALID_ENUM",
        glow::INVALID_VALUE => "GL_INVALID_VALUE",
        glow::INVALID_OPERATION => "GL_INVALID_OPERATION",
        glow::INVALID_FRAMEBUFFER_OPERATION => "GL_INVALID_FRAMEBUFFER_OPERATION",
        glow::OUT_OF_MEMORY => "GL_OUT_OF_MEMORY",
        glow::STACK_UNDERFLOW => "GL_STACK_UNDERFLOW",
        glow::STACK_OVERFLOW => "GL_STACK_OVERFLOW",
        _ => "GL_UNKNOWN_ERROR",
    }
}

/// Drain the GL error queue after `operation`
///
/// Every pending error is logged by name. `GL_OUT_OF_MEMORY` maps to
/// `Error::OutOfMemory`, anything else to a backend error.
pub(crate) fn check_gl_errors(gl: &glow::Context, operation: &str) -> Result<()> {
    let mut first = None;
    // glGetError returns one flag per call; bounded against broken drivers
    for _ in 0..32 {
        let code = unsafe { gl.get_error() };
        if code == glow::NO_ERROR {
            break;
        }
        engine_error!(SOURCE, "{} failed: {} (0x{:04X})", operation, gl_error_name(code), code);
        first.get_or_insert(code);
    }
    match first {
        None => Ok(()),
        Some(glow::OUT_OF_MEMORY) => Err(Error::OutOfMemory),
        Some(code) => Err(Error::BackendError(format!("{} failed: {}", operation, gl_error_name(code)))),
    }
}

/// Clear stale errors left by the host before we start checking ours
pub(crate) fn clear_gl_errors(gl: &glow::Context) {
    for _ in 0..32 {
        if unsafe { gl.get_error() } == glow::NO_ERROR {
            break;
        }
    }
}

/// Check a context version against the backend's requirements
///
/// Returns `Ok(true)` at or above the target version and `Ok(false)` for a
/// usable but older context (logged). Below the minimum, or on an ES
/// context, initialization fails.
pub fn check_gl_version(major: u32, minor: u32, is_embedded: bool) -> Result<bool> {
    if is_embedded {
        return Err(Error::InitializationFailed(format!(
            "OpenGL ES {}.{} context, desktop OpenGL {}.{}+ required",
            major, minor, MIN_GL_VERSION.0, MIN_GL_VERSION.1
        )));
    }
    if (major, minor) < MIN_GL_VERSION {
        return Err(Error::InitializationFailed(format!(
            "OpenGL {}.{} context, {}.{}+ required",
            major, minor, MIN_GL_VERSION.0, MIN_GL_VERSION.1
        )));
    }
    if (major, minor) < TARGET_GL_VERSION {
        engine_warn!(
            SOURCE,
            "OpenGL {}.{} is below {}.{}; some features may be unavailable",
            major,
            minor,
            TARGET_GL_VERSION.0,
            TARGET_GL_VERSION.1
        );
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
#[path = "gl_error_tests.rs"]
mod tests;
