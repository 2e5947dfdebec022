/// Shader - Vulkan implementation of RenderShader trait
///
/// Takes one SPIR-V module per stage and bakes them into a graphics
/// pipeline over the shared layout. The push-constant block of both stages
/// is reflected with spirq; uniforms are staged in a [`UniformBlock`] with
/// that layout and pushed when the shader is bound.

use ash::vk;
use ash::vk::Handle;
use fresh_render::fresh::pacing::TrackedResource;
use fresh_render::fresh::resource::{
    NativeHandle, RenderShader, ShaderSource, UniformBlock, UniformMember, UniformValue,
};
use fresh_render::fresh::{Error, Result};
use fresh_render::glam::{Mat4, Vec2, Vec3, Vec4};
use fresh_render::{engine_debug, engine_error, engine_trace, engine_warn};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::vulkan_device::{RetiredObject, VulkanDevice};
use crate::vulkan_pipeline::{VulkanPipeline, PUSH_CONSTANT_STAGES};
use crate::vulkan_util::{spirv_source, SOURCE};

/// Members of the push-constant block declared by a SPIR-V module
pub fn reflect_push_constants(code: &[u32], stage_name: &str) -> Result<Vec<UniformMember>> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| {
            engine_error!(SOURCE, "{} shader reflection failed: {:?}", stage_name, e);
            Error::ShaderCompilation(format!("{} stage: SPIR-V reflection failed: {:?}", stage_name, e))
        })?;

    let mut members = Vec::new();
    for entry_point in &entry_points {
        for var in entry_point.vars.iter() {
            if let spirq::var::Variable::PushConstant {
                ty: spirq::ty::Type::Struct(st),
                ..
            } = var
            {
                members.extend(st.members.iter().filter_map(|m| {
                    Some(UniformMember {
                        name: m.name.clone()?,
                        offset: m.offset?,
                        size: m.ty.nbyte()?,
                    })
                }));
            }
        }
    }
    Ok(members)
}

/// One layout out of the vertex and fragment push-constant members
///
/// The stages share one range, so a name declared by both must sit at the
/// same offset with the same size.
pub fn merge_push_constants(vertex: Vec<UniformMember>, fragment: Vec<UniformMember>) -> Result<Vec<UniformMember>> {
    let mut merged = vertex;
    for member in fragment {
        match merged.iter().find(|m| m.name == member.name) {
            Some(existing) if *existing == member => {}
            Some(existing) => {
                engine_error!(
                    SOURCE,
                    "Push constant '{}' at offset {} ({} bytes) in the vertex stage but {} ({} bytes) in the fragment stage",
                    member.name,
                    existing.offset,
                    existing.size,
                    member.offset,
                    member.size
                );
                return Err(Error::ShaderCompilation(format!(
                    "push constant '{}' differs between stages",
                    member.name
                )));
            }
            None => merged.push(member),
        }
    }
    merged.sort_by_key(|m| m.offset);
    Ok(merged)
}

fn create_module(device: &ash::Device, code: &[u32], stage_name: &str) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::default().code(code);
    unsafe { device.create_shader_module(&info, None) }.map_err(|e| {
        engine_error!(SOURCE, "{} shader module creation failed: {:?}", stage_name, e);
        Error::ShaderCompilation(format!("{} stage: {:?}", stage_name, e))
    })
}

pub struct Shader {
    device: Rc<VulkanDevice>,
    pipeline_layout: Rc<VulkanPipeline>,
    pipeline: vk::Pipeline,
    uniforms: RefCell<UniformBlock>,
    bound: Cell<bool>,
    _tracked: TrackedResource,
}

impl Shader {
    pub(crate) fn new(
        device: Rc<VulkanDevice>,
        pipeline_layout: Rc<VulkanPipeline>,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        tracked: TrackedResource,
    ) -> Result<Self> {
        let vs_code = spirv_source(vertex, "Vertex")?;
        let fs_code = spirv_source(fragment, "Fragment")?;
        let members = merge_push_constants(
            reflect_push_constants(vs_code, "Vertex")?,
            reflect_push_constants(fs_code, "Fragment")?,
        )?;
        let uniforms = UniformBlock::with_layout(members).map_err(|e| {
            engine_error!(SOURCE, "Push-constant block does not fit: {}", e);
            Error::ShaderCompilation(format!("push-constant block: {}", e))
        })?;

        let vs = create_module(&device.device, vs_code, "Vertex")?;
        let fs = match create_module(&device.device, fs_code, "Fragment") {
            Ok(fs) => fs,
            Err(e) => {
                unsafe { device.device.destroy_shader_module(vs, None) };
                return Err(e);
            }
        };
        let pipeline = pipeline_layout.create_graphics_pipeline(vs, fs);
        // The pipeline keeps its own copy of the code
        unsafe {
            device.device.destroy_shader_module(vs, None);
            device.device.destroy_shader_module(fs, None);
        }
        let pipeline = pipeline?;

        engine_debug!(
            SOURCE,
            "Created pipeline ({} + {} words of SPIR-V, {} uniform(s))",
            vs_code.len(),
            fs_code.len(),
            uniforms.members().len()
        );
        Ok(Self {
            device,
            pipeline_layout,
            pipeline,
            uniforms: RefCell::new(uniforms),
            bound: Cell::new(false),
            _tracked: tracked,
        })
    }

    fn record_uniforms(&self, command_buffer: vk::CommandBuffer) {
        let mut uniforms = self.uniforms.borrow_mut();
        uniforms.take_dirty();
        if uniforms.is_empty() {
            return;
        }
        unsafe {
            self.device.device.cmd_push_constants(
                command_buffer,
                self.pipeline_layout.layout(),
                PUSH_CONSTANT_STAGES,
                0,
                uniforms.bytes(),
            );
        }
    }

    fn set(&self, name: &str, value: UniformValue) {
        match self.uniforms.borrow_mut().set(name, value) {
            Ok(true) => {}
            Ok(false) => {
                engine_trace!(SOURCE, "Uniform '{}' is not in the push-constant block", name);
                return;
            }
            Err(e) => {
                engine_warn!(SOURCE, "Uniform '{}' not set: {}", name, e);
                return;
            }
        }
        if self.bound.get() {
            if let Some(command_buffer) = self.device.current_command_buffer() {
                self.record_uniforms(command_buffer);
            }
        }
    }
}

impl RenderShader for Shader {
    fn bind(&self) {
        let Some(command_buffer) = self.device.recording_command_buffer("Shader bind") else {
            return;
        };
        unsafe {
            self.device
                .device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
        self.record_uniforms(command_buffer);
        self.bound.set(true);
    }

    fn unbind(&self) {
        self.bound.set(false);
    }

    fn set_uniform_int(&self, name: &str, value: i32) {
        self.set(name, UniformValue::Int(value));
    }

    fn set_uniform_float(&self, name: &str, value: f32) {
        self.set(name, UniformValue::Float(value));
    }

    fn set_uniform_vec2(&self, name: &str, value: Vec2) {
        self.set(name, UniformValue::Vec2(value));
    }

    fn set_uniform_vec3(&self, name: &str, value: Vec3) {
        self.set(name, UniformValue::Vec3(value));
    }

    fn set_uniform_vec4(&self, name: &str, value: Vec4) {
        self.set(name, UniformValue::Vec4(value));
    }

    fn set_uniform_mat4(&self, name: &str, value: Mat4) {
        self.set(name, UniformValue::Mat4(value));
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::Vulkan(self.pipeline.as_raw())
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.device.retire(RetiredObject::Pipeline(self.pipeline));
    }
}

#[cfg(test)]
#[path = "vulkan_shader_tests.rs"]
mod tests;
