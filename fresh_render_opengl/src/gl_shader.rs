/// Shader - OpenGL implementation of RenderShader trait

use fresh_render::fresh::pacing::TrackedResource;
use fresh_render::fresh::resource::{NativeHandle, RenderShader, ShaderSource};
use fresh_render::fresh::{Error, Result};
use fresh_render::glam::{Mat4, Vec2, Vec3, Vec4};
use fresh_render::{engine_err, engine_error, engine_trace};
use glow::HasContext;
use std::num::NonZeroU32;
use std::rc::Rc;

use crate::gl_error::SOURCE;

/// GLSL text of a stage, rejecting sources meant for other backends
pub fn glsl_source<'a>(stage: &'a ShaderSource, stage_name: &str) -> Result<&'a str> {
    match stage {
        ShaderSource::Glsl(source) => Ok(source),
        other => {
            engine_error!(
                SOURCE,
                "{} shader given {} source, the OpenGL backend takes GLSL",
                stage_name,
                other.kind_name()
            );
            Err(Error::ShaderCompilation(format!(
                "{} stage: expected GLSL, got {}",
                stage_name,
                other.kind_name()
            )))
        }
    }
}

/// Program to make current again after writing uniforms of `own` while
/// `current` is in use, or None when `own` already is current
pub fn program_to_restore(current: u32, own: u32) -> Option<Option<glow::Program>> {
    if current == own {
        None
    } else {
        Some(NonZeroU32::new(current).map(glow::NativeProgram))
    }
}

/// Linked GL program
pub struct Shader {
    gl: Rc<glow::Context>,
    pub(crate) program: glow::Program,
    _tracked: TrackedResource,
}

unsafe fn compile_stage(gl: &glow::Context, kind: u32, stage_name: &str, source: &str) -> Result<glow::Shader> {
    let shader = gl
        .create_shader(kind)
        .map_err(|e| engine_err!(SOURCE, "glCreateShader failed: {}", e))?;
    gl.shader_source(shader, source);
    gl.compile_shader(shader);
    if !gl.get_shader_compile_status(shader) {
        let log = gl.get_shader_info_log(shader);
        gl.delete_shader(shader);
        engine_error!(SOURCE, "{} shader compilation failed: {}", stage_name, log.trim_end());
        return Err(Error::ShaderCompilation(format!("{} stage: {}", stage_name, log.trim_end())));
    }
    Ok(shader)
}

impl Shader {
    pub(crate) fn new(
        gl: Rc<glow::Context>,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        tracked: TrackedResource,
    ) -> Result<Self> {
        let vertex_src = glsl_source(vertex, "Vertex")?;
        let fragment_src = glsl_source(fragment, "Fragment")?;

        let program = unsafe {
            let vs = compile_stage(&gl, glow::VERTEX_SHADER, "Vertex", vertex_src)?;
            let fs = match compile_stage(&gl, glow::FRAGMENT_SHADER, "Fragment", fragment_src) {
                Ok(fs) => fs,
                Err(e) => {
                    gl.delete_shader(vs);
                    return Err(e);
                }
            };

            let program = match gl.create_program() {
                Ok(program) => program,
                Err(e) => {
                    gl.delete_shader(vs);
                    gl.delete_shader(fs);
                    return Err(engine_err!(SOURCE, "glCreateProgram failed: {}", e));
                }
            };
            gl.attach_shader(program, vs);
            gl.attach_shader(program, fs);
            gl.link_program(program);
            let linked = gl.get_program_link_status(program);

            gl.detach_shader(program, vs);
            gl.detach_shader(program, fs);
            gl.delete_shader(vs);
            gl.delete_shader(fs);

            if !linked {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                engine_error!(SOURCE, "Shader program linking failed: {}", log.trim_end());
                return Err(Error::ShaderCompilation(format!("link: {}", log.trim_end())));
            }
            program
        };

        Ok(Self {
            gl,
            program,
            _tracked: tracked,
        })
    }

    /// Write uniform `name` of this program; the current program is unchanged
    ///
    /// Unknown names (GL location -1) are ignored with a trace.
    fn write_uniform(&self, name: &str, write: impl FnOnce(&glow::Context, &glow::UniformLocation)) {
        let Some(location) = (unsafe { self.gl.get_uniform_location(self.program, name) }) else {
            engine_trace!(SOURCE, "Uniform '{}' not found in program, ignored", name);
            return;
        };
        unsafe {
            let current = self.gl.get_parameter_i32(glow::CURRENT_PROGRAM) as u32;
            let restore = program_to_restore(current, self.program.0.get());
            if restore.is_some() {
                self.gl.use_program(Some(self.program));
            }
            write(&self.gl, &location);
            if let Some(previous) = restore {
                self.gl.use_program(previous);
            }
        }
    }
}

impl RenderShader for Shader {
    fn bind(&self) {
        unsafe { self.gl.use_program(Some(self.program)) };
    }

    fn unbind(&self) {
        unsafe { self.gl.use_program(None) };
    }

    fn set_uniform_int(&self, name: &str, value: i32) {
        self.write_uniform(name, |gl, location| unsafe { gl.uniform_1_i32(Some(location), value) });
    }

    fn set_uniform_float(&self, name: &str, value: f32) {
        self.write_uniform(name, |gl, location| unsafe { gl.uniform_1_f32(Some(location), value) });
    }

    fn set_uniform_vec2(&self, name: &str, value: Vec2) {
        self.write_uniform(name, |gl, location| unsafe { gl.uniform_2_f32(Some(location), value.x, value.y) });
    }

    fn set_uniform_vec3(&self, name: &str, value: Vec3) {
        self.write_uniform(name, |gl, location| unsafe {
            gl.uniform_3_f32(Some(location), value.x, value.y, value.z)
        });
    }

    fn set_uniform_vec4(&self, name: &str, value: Vec4) {
        self.write_uniform(name, |gl, location| unsafe {
            gl.uniform_4_f32(Some(location), value.x, value.y, value.z, value.w)
        });
    }

    fn set_uniform_mat4(&self, name: &str, value: Mat4) {
        self.write_uniform(name, |gl, location| unsafe {
            gl.uniform_matrix_4_f32_slice(Some(location), false, &value.to_cols_array())
        });
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::GlObject(self.program.0.get())
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_program(self.program);
        }
    }
}
