/// Texture - OpenGL implementation of RenderTexture trait

use fresh_render::fresh::pacing::TrackedResource;
use fresh_render::fresh::resource::{validate_texture_request, validate_texture_unit, NativeHandle, RenderTexture};
use fresh_render::fresh::{Error, Result};
use fresh_render::{engine_err, engine_warn};
use glow::HasContext;
use std::cell::Cell;
use std::rc::Rc;

use crate::gl_error::{check_gl_errors, SOURCE};

/// Number of mip levels of a full chain for a `width` x `height` texture
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// 2D RGBA8 texture object with a full mip chain
pub struct Texture {
    gl: Rc<glow::Context>,
    pub(crate) texture: glow::Texture,
    width: u32,
    height: u32,
    bound_unit: Cell<Option<u32>>,
    _tracked: TrackedResource,
}

impl Texture {
    pub(crate) fn new(
        gl: Rc<glow::Context>,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
        tracked: TrackedResource,
    ) -> Result<Self> {
        validate_texture_request(width, height, data)?;
        let (w, h) = match (i32::try_from(width), i32::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(Error::InvalidResource(format!(
                    "texture of size {}x{} is too large",
                    width, height
                )))
            }
        };
        let pixels = data.map(|d| &d[..width as usize * height as usize * 4]);

        let texture = unsafe {
            let texture = gl
                .create_texture()
                .map_err(|e| engine_err!(SOURCE, "glGenTextures failed: {}", e))?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));

            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::REPEAT as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::REPEAT as i32);
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MIN_FILTER,
                glow::LINEAR_MIPMAP_LINEAR as i32,
            );
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MAX_LEVEL,
                mip_level_count(width, height) as i32 - 1,
            );

            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA8 as i32,
                w,
                h,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                pixels,
            );
            gl.generate_mipmap(glow::TEXTURE_2D);
            gl.bind_texture(glow::TEXTURE_2D, None);
            texture
        };

        if let Err(e) = check_gl_errors(&gl, "glTexImage2D") {
            unsafe { gl.delete_texture(texture) };
            return Err(e);
        }

        Ok(Self {
            gl,
            texture,
            width,
            height,
            bound_unit: Cell::new(None),
            _tracked: tracked,
        })
    }
}

impl RenderTexture for Texture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn bind(&self, unit: u32) {
        if let Err(e) = validate_texture_unit(unit) {
            engine_warn!(SOURCE, "Texture bind ignored: {}", e);
            return;
        }
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(glow::TEXTURE_2D, Some(self.texture));
        }
        self.bound_unit.set(Some(unit));
    }

    fn unbind(&self) {
        if let Some(unit) = self.bound_unit.take() {
            unsafe {
                self.gl.active_texture(glow::TEXTURE0 + unit);
                self.gl.bind_texture(glow::TEXTURE_2D, None);
            }
        }
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::GlObject(self.texture.0.get())
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_texture(self.texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mip_level_count;

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(256, 256), 9);
        assert_eq!(mip_level_count(800, 600), 10);
        assert_eq!(mip_level_count(1, 1024), 11);
    }
}
