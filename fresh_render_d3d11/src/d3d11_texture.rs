/// Texture - Direct3D 11 implementation of RenderTexture trait

use fresh_render::fresh::pacing::TrackedResource;
use fresh_render::fresh::resource::{validate_texture_request, validate_texture_unit, NativeHandle, RenderTexture};
use fresh_render::fresh::Result;
use fresh_render::{engine_err, engine_warn};
use std::cell::Cell;
use std::ffi::c_void;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_SAMPLE_DESC};

use crate::d3d11_util::{texture_row_pitch, SOURCE};

/// 2D RGBA8 texture with its shader resource view and sampler
pub struct Texture {
    context: ID3D11DeviceContext,
    pub(crate) texture: ID3D11Texture2D,
    pub(crate) srv: ID3D11ShaderResourceView,
    sampler: ID3D11SamplerState,
    width: u32,
    height: u32,
    bound_unit: Cell<Option<u32>>,
    _tracked: TrackedResource,
}

impl Texture {
    pub(crate) fn new(
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
        tracked: TrackedResource,
    ) -> Result<Self> {
        validate_texture_request(width, height, data)?;

        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let init_data = data.map(|pixels| D3D11_SUBRESOURCE_DATA {
            pSysMem: pixels.as_ptr() as *const c_void,
            SysMemPitch: texture_row_pitch(width),
            SysMemSlicePitch: 0,
        });

        let mut texture = None;
        let mut srv = None;
        let mut sampler = None;
        unsafe {
            device
                .CreateTexture2D(&desc, init_data.as_ref().map(|d| d as *const _), Some(&mut texture))
                .map_err(|e| engine_err!(SOURCE, "CreateTexture2D ({}x{}) failed: {}", width, height, e))?;
            let texture = texture
                .as_ref()
                .ok_or_else(|| engine_err!(SOURCE, "CreateTexture2D returned no texture"))?;
            device
                .CreateShaderResourceView(texture, None, Some(&mut srv))
                .map_err(|e| engine_err!(SOURCE, "CreateShaderResourceView failed: {}", e))?;

            let sampler_desc = D3D11_SAMPLER_DESC {
                Filter: D3D11_FILTER_MIN_MAG_MIP_LINEAR,
                AddressU: D3D11_TEXTURE_ADDRESS_WRAP,
                AddressV: D3D11_TEXTURE_ADDRESS_WRAP,
                AddressW: D3D11_TEXTURE_ADDRESS_WRAP,
                MipLODBias: 0.0,
                MaxAnisotropy: 1,
                ComparisonFunc: D3D11_COMPARISON_NEVER,
                BorderColor: [0.0; 4],
                MinLOD: 0.0,
                MaxLOD: D3D11_FLOAT32_MAX,
            };
            device
                .CreateSamplerState(&sampler_desc, Some(&mut sampler))
                .map_err(|e| engine_err!(SOURCE, "CreateSamplerState failed: {}", e))?;
        }

        match (texture, srv, sampler) {
            (Some(texture), Some(srv), Some(sampler)) => Ok(Self {
                context: context.clone(),
                texture,
                srv,
                sampler,
                width,
                height,
                bound_unit: Cell::new(None),
                _tracked: tracked,
            }),
            _ => Err(engine_err!(SOURCE, "Texture creation returned a null view or sampler")),
        }
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
            self.context.PSSetShaderResources(unit, Some(&[Some(self.srv.clone())]));
            self.context.PSSetSamplers(unit, Some(&[Some(self.sampler.clone())]));
        }
        self.bound_unit.set(Some(unit));
    }

    fn unbind(&self) {
        if let Some(unit) = self.bound_unit.take() {
            unsafe {
                self.context.PSSetShaderResources(unit, Some(&[None]));
                self.context.PSSetSamplers(unit, Some(&[None]));
            }
        }
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::ComPtr(self.texture.as_raw())
    }
}
