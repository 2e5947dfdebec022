/// Shader - Direct3D 11 implementation of RenderShader trait
///
/// Both stages are compiled with `D3DCompile` (vs_5_0 / ps_5_0, entry
/// `main`). Uniforms are staged in a [`UniformBlock`] and written to a
/// 128-byte constant buffer bound at b0 of both stages.

use fresh_render::fresh::pacing::TrackedResource;
use fresh_render::fresh::resource::{
    BufferKind, MeshVertex, NativeHandle, RenderBuffer, RenderShader, ShaderSource, UniformBlock, UniformValue,
};
use fresh_render::fresh::{Error, Result};
use fresh_render::glam::{Mat4, Vec2, Vec3, Vec4};
use fresh_render::{engine_debug, engine_err, engine_error, engine_warn};
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use windows::core::{s, Interface, PCSTR};
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCompile, D3DCOMPILE_ENABLE_STRICTNESS, D3DCOMPILE_OPTIMIZATION_LEVEL3};
use windows::Win32::Graphics::Direct3D::{ID3DBlob, D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST};
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R32G32B32_FLOAT;

use crate::d3d11_buffer::Buffer;
use crate::d3d11_util::{compile_log, hlsl_source, CONSTANT_BUFFER_SIZE, SHADER_CONSTANTS_SLOT, SOURCE};

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

/// Compile one HLSL stage to bytecode
pub(crate) fn compile_hlsl(source: &str, target: PCSTR, stage_name: &str) -> Result<Vec<u8>> {
    let flags = if cfg!(debug_assertions) {
        D3DCOMPILE_ENABLE_STRICTNESS
    } else {
        D3DCOMPILE_ENABLE_STRICTNESS | D3DCOMPILE_OPTIMIZATION_LEVEL3
    };

    let mut code: Option<ID3DBlob> = None;
    let mut errors: Option<ID3DBlob> = None;
    let result = unsafe {
        D3DCompile(
            source.as_ptr() as *const c_void,
            source.len(),
            PCSTR::null(),
            None,
            None,
            s!("main"),
            target,
            flags,
            0,
            &mut code,
            Some(&mut errors),
        )
    };

    if let Err(e) = result {
        let log = errors.as_ref().map(|b| compile_log(blob_bytes(b))).unwrap_or_default();
        engine_error!(SOURCE, "{} shader compilation failed: {} {}", stage_name, e, log);
        return Err(Error::ShaderCompilation(format!("{} stage: {}", stage_name, log)));
    }
    if let Some(warnings) = errors.as_ref() {
        engine_warn!(SOURCE, "{} shader: {}", stage_name, compile_log(blob_bytes(warnings)));
    }
    code.map(|blob| blob_bytes(&blob).to_vec())
        .ok_or_else(|| Error::ShaderCompilation(format!("{} stage produced no bytecode", stage_name)))
}

/// Input layout matching [`MeshVertex`]
fn mesh_vertex_layout() -> [D3D11_INPUT_ELEMENT_DESC; 2] {
    [
        D3D11_INPUT_ELEMENT_DESC {
            SemanticName: s!("POSITION"),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32B32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: MeshVertex::POSITION_OFFSET,
            InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
        D3D11_INPUT_ELEMENT_DESC {
            SemanticName: s!("NORMAL"),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32B32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: MeshVertex::NORMAL_OFFSET,
            InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
    ]
}

/// Vertex + pixel shader pair with its input layout and constants
pub struct Shader {
    context: ID3D11DeviceContext,
    vertex_shader: ID3D11VertexShader,
    pixel_shader: ID3D11PixelShader,
    input_layout: ID3D11InputLayout,
    constants: Buffer,
    uniforms: RefCell<UniformBlock>,
    bound: Cell<bool>,
    _tracked: TrackedResource,
}

impl Shader {
    pub(crate) fn new(
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        tracked: TrackedResource,
    ) -> Result<Self> {
        let vs_bytecode = compile_hlsl(hlsl_source(vertex, "Vertex")?, s!("vs_5_0"), "Vertex")?;
        let ps_bytecode = compile_hlsl(hlsl_source(fragment, "Pixel")?, s!("ps_5_0"), "Pixel")?;

        let mut vertex_shader = None;
        let mut pixel_shader = None;
        let mut input_layout = None;
        unsafe {
            device
                .CreateVertexShader(&vs_bytecode, None, Some(&mut vertex_shader))
                .map_err(|e| engine_err!(SOURCE, "CreateVertexShader failed: {}", e))?;
            device
                .CreatePixelShader(&ps_bytecode, None, Some(&mut pixel_shader))
                .map_err(|e| engine_err!(SOURCE, "CreatePixelShader failed: {}", e))?;
            device
                .CreateInputLayout(&mesh_vertex_layout(), &vs_bytecode, Some(&mut input_layout))
                .map_err(|e| engine_err!(SOURCE, "CreateInputLayout failed: {}", e))?;
        }

        let constants = Buffer::new(
            device,
            context,
            BufferKind::Uniform,
            None,
            CONSTANT_BUFFER_SIZE,
            None,
        )?
        .with_slot(SHADER_CONSTANTS_SLOT);

        match (vertex_shader, pixel_shader, input_layout) {
            (Some(vertex_shader), Some(pixel_shader), Some(input_layout)) => {
                engine_debug!(
                    SOURCE,
                    "Compiled shader ({} + {} bytes of bytecode)",
                    vs_bytecode.len(),
                    ps_bytecode.len()
                );
                Ok(Self {
                    context: context.clone(),
                    vertex_shader,
                    pixel_shader,
                    input_layout,
                    constants,
                    uniforms: RefCell::new(UniformBlock::packed()),
                    bound: Cell::new(false),
                    _tracked: tracked,
                })
            }
            _ => Err(engine_err!(SOURCE, "Shader creation returned a null object")),
        }
    }

    /// Copy staged uniforms into the constant buffer if they changed
    fn flush_uniforms(&self) {
        let mut uniforms = self.uniforms.borrow_mut();
        if !uniforms.take_dirty() {
            return;
        }
        if let Err(e) = self.constants.update_data(uniforms.bytes(), 0) {
            engine_warn!(SOURCE, "Uniform upload failed: {}", e);
        }
    }

    fn set(&self, name: &str, value: UniformValue) {
        if let Err(e) = self.uniforms.borrow_mut().set(name, value) {
            engine_warn!(SOURCE, "Uniform '{}' not set: {}", name, e);
            return;
        }
        if self.bound.get() {
            self.flush_uniforms();
        }
    }
}

impl RenderShader for Shader {
    fn bind(&self) {
        unsafe {
            self.context.IASetInputLayout(&self.input_layout);
            self.context.IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            self.context.VSSetShader(&self.vertex_shader, None);
            self.context.PSSetShader(&self.pixel_shader, None);
        }
        self.flush_uniforms();
        self.constants.bind();
        self.bound.set(true);
    }

    fn unbind(&self) {
        unsafe {
            self.context.VSSetShader(None, None);
            self.context.PSSetShader(None, None);
        }
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
        NativeHandle::ComPtr(self.vertex_shader.as_raw())
    }
}
