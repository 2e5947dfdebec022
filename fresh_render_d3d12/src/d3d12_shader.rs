/// Shader - Direct3D 12 implementation of RenderShader trait
///
/// Compiles both HLSL stages and bakes them into a pipeline state object
/// over the shared root signature. Uniforms are staged in a
/// [`UniformBlock`] and recorded as root constants (b0) when bound.

use fresh_render::fresh::pacing::TrackedResource;
use fresh_render::fresh::resource::{
    MeshVertex, NativeHandle, RenderShader, ShaderSource, UniformBlock, UniformValue,
};
use fresh_render::fresh::{Error, Result};
use fresh_render::glam::{Mat4, Vec2, Vec3, Vec4};
use fresh_render::{engine_debug, engine_err, engine_error, engine_warn};
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::rc::Rc;
use windows::core::{s, Interface, PCSTR};
use windows::Win32::Foundation::{FALSE, TRUE};
use windows::Win32::Graphics::Direct3D::Fxc::{D3DCompile, D3DCOMPILE_ENABLE_STRICTNESS, D3DCOMPILE_OPTIMIZATION_LEVEL3};
use windows::Win32::Graphics::Direct3D::{ID3DBlob, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::d3d12_device::{blob_bytes, GpuShared};
use crate::d3d12_util::{blob_message, hlsl_source, ROOT_PARAM_CONSTANTS, SOURCE};

/// Render target and depth formats every pipeline is built for
pub(crate) const RENDER_TARGET_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;
pub(crate) const DEPTH_FORMAT: DXGI_FORMAT = DXGI_FORMAT_D32_FLOAT;

fn compile_hlsl(source: &str, target: PCSTR, stage_name: &str) -> Result<ID3DBlob> {
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
        let log = errors.as_ref().map(|b| blob_message(blob_bytes(b))).unwrap_or_default();
        engine_error!(SOURCE, "{} shader compilation failed: {} {}", stage_name, e, log);
        return Err(Error::ShaderCompilation(format!("{} stage: {}", stage_name, log)));
    }
    if let Some(warnings) = errors.as_ref() {
        engine_warn!(SOURCE, "{} shader: {}", stage_name, blob_message(blob_bytes(warnings)));
    }
    code.ok_or_else(|| Error::ShaderCompilation(format!("{} stage produced no bytecode", stage_name)))
}

fn bytecode(blob: &ID3DBlob) -> D3D12_SHADER_BYTECODE {
    unsafe {
        D3D12_SHADER_BYTECODE {
            pShaderBytecode: blob.GetBufferPointer(),
            BytecodeLength: blob.GetBufferSize(),
        }
    }
}

fn mesh_vertex_layout() -> [D3D12_INPUT_ELEMENT_DESC; 2] {
    [
        D3D12_INPUT_ELEMENT_DESC {
            SemanticName: s!("POSITION"),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32B32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: MeshVertex::POSITION_OFFSET,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
        D3D12_INPUT_ELEMENT_DESC {
            SemanticName: s!("NORMAL"),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32B32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: MeshVertex::NORMAL_OFFSET,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
    ]
}

fn alpha_blend_state() -> D3D12_BLEND_DESC {
    let target = D3D12_RENDER_TARGET_BLEND_DESC {
        BlendEnable: TRUE,
        LogicOpEnable: FALSE,
        SrcBlend: D3D12_BLEND_SRC_ALPHA,
        DestBlend: D3D12_BLEND_INV_SRC_ALPHA,
        BlendOp: D3D12_BLEND_OP_ADD,
        SrcBlendAlpha: D3D12_BLEND_ONE,
        DestBlendAlpha: D3D12_BLEND_INV_SRC_ALPHA,
        BlendOpAlpha: D3D12_BLEND_OP_ADD,
        LogicOp: D3D12_LOGIC_OP_NOOP,
        RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
    };
    D3D12_BLEND_DESC {
        AlphaToCoverageEnable: FALSE,
        IndependentBlendEnable: FALSE,
        RenderTarget: [target; 8],
    }
}

pub struct Shader {
    shared: Rc<GpuShared>,
    pipeline: ID3D12PipelineState,
    uniforms: RefCell<UniformBlock>,
    bound: Cell<bool>,
    _tracked: TrackedResource,
}

impl Shader {
    pub(crate) fn new(
        shared: Rc<GpuShared>,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        tracked: TrackedResource,
    ) -> Result<Self> {
        let vs = compile_hlsl(hlsl_source(vertex, "Vertex")?, s!("vs_5_0"), "Vertex")?;
        let ps = compile_hlsl(hlsl_source(fragment, "Pixel")?, s!("ps_5_0"), "Pixel")?;
        let layout = mesh_vertex_layout();

        let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
        rtv_formats[0] = RENDER_TARGET_FORMAT;

        let desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: ManuallyDrop::new(Some(shared.root_signature.clone())),
            VS: bytecode(&vs),
            PS: bytecode(&ps),
            BlendState: alpha_blend_state(),
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: D3D12_CULL_MODE_BACK,
                FrontCounterClockwise: FALSE,
                DepthClipEnable: TRUE,
                ..Default::default()
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: TRUE,
                DepthWriteMask: D3D12_DEPTH_WRITE_MASK_ALL,
                DepthFunc: D3D12_COMPARISON_FUNC_LESS,
                StencilEnable: FALSE,
                ..Default::default()
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: layout.as_ptr(),
                NumElements: layout.len() as u32,
            },
            PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            NumRenderTargets: 1,
            RTVFormats: rtv_formats,
            DSVFormat: DEPTH_FORMAT,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            ..Default::default()
        };

        let pipeline: windows::core::Result<ID3D12PipelineState> =
            unsafe { shared.device.CreateGraphicsPipelineState(&desc) };
        // Balance the AddRef taken for the descriptor
        drop(ManuallyDrop::into_inner(desc.pRootSignature));
        let pipeline = pipeline.map_err(|e| engine_err!(SOURCE, "CreateGraphicsPipelineState failed: {}", e))?;

        engine_debug!(
            SOURCE,
            "Compiled pipeline ({} + {} bytes of bytecode)",
            unsafe { vs.GetBufferSize() },
            unsafe { ps.GetBufferSize() }
        );
        Ok(Self {
            shared,
            pipeline,
            uniforms: RefCell::new(UniformBlock::packed()),
            bound: Cell::new(false),
            _tracked: tracked,
        })
    }

    /// Record the staged uniforms as root constants
    fn record_uniforms(&self, list: &ID3D12GraphicsCommandList) {
        let mut uniforms = self.uniforms.borrow_mut();
        uniforms.take_dirty();
        if uniforms.is_empty() {
            return;
        }
        let words = uniforms.words();
        unsafe {
            list.SetGraphicsRoot32BitConstants(
                ROOT_PARAM_CONSTANTS,
                words.len() as u32,
                words.as_ptr() as *const c_void,
                0,
            );
        }
    }

    fn set(&self, name: &str, value: UniformValue) {
        if let Err(e) = self.uniforms.borrow_mut().set(name, value) {
            engine_warn!(SOURCE, "Uniform '{}' not set: {}", name, e);
            return;
        }
        if self.bound.get() {
            if let Some(list) = self.shared.current_list() {
                self.record_uniforms(list);
            }
        }
    }
}

impl RenderShader for Shader {
    fn bind(&self) {
        let Some(list) = self.shared.recording_list("Shader bind") else {
            return;
        };
        unsafe {
            list.SetGraphicsRootSignature(&self.shared.root_signature);
            list.SetPipelineState(&self.pipeline);
            list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
        }
        self.record_uniforms(list);
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
        NativeHandle::ComPtr(self.pipeline.as_raw())
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.shared.retire(self.pipeline.clone(), None);
    }
}
