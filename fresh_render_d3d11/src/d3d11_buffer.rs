/// Buffer - Direct3D 11 implementation of RenderBuffer trait
///
/// Vertex and index buffers live in DEFAULT memory and are updated with
/// `UpdateSubresource`. Uniform buffers are DYNAMIC constant buffers; they
/// keep a CPU shadow so a partial update can be written with WRITE_DISCARD.
/// A uniform buffer binds at b1 of both stages; b0 holds the constants of
/// the bound shader.

use fresh_render::fresh::pacing::TrackedResource;
use fresh_render::fresh::resource::{
    validate_buffer_request, validate_buffer_update, BufferKind, MeshVertex, NativeHandle, RenderBuffer,
};
use fresh_render::fresh::{Error, Result};
use fresh_render::engine_err;
use std::cell::RefCell;
use std::ffi::c_void;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R32_UINT;

use crate::d3d11_util::{constant_buffer_width, SOURCE, UNIFORM_BUFFER_SLOT};

/// Direct3D 11 buffer
pub struct Buffer {
    context: ID3D11DeviceContext,
    pub(crate) buffer: ID3D11Buffer,
    kind: BufferKind,
    size: usize,
    shadow: Option<RefCell<Vec<u8>>>,
    slot: u32,
    _tracked: Option<TrackedResource>,
}

fn bind_flags(kind: BufferKind) -> D3D11_BIND_FLAG {
    match kind {
        BufferKind::Vertex => D3D11_BIND_VERTEX_BUFFER,
        BufferKind::Index => D3D11_BIND_INDEX_BUFFER,
        BufferKind::Uniform => D3D11_BIND_CONSTANT_BUFFER,
    }
}

impl Buffer {
    pub(crate) fn new(
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        kind: BufferKind,
        data: Option<&[u8]>,
        size: usize,
        tracked: Option<TrackedResource>,
    ) -> Result<Self> {
        validate_buffer_request(kind, data, size)?;

        let dynamic = kind == BufferKind::Uniform;
        let byte_width = if dynamic { constant_buffer_width(size) } else { size };
        let byte_width = u32::try_from(byte_width)
            .map_err(|_| Error::InvalidResource(format!("{:?} buffer of {} bytes is too large", kind, size)))?;

        let desc = D3D11_BUFFER_DESC {
            ByteWidth: byte_width,
            Usage: if dynamic { D3D11_USAGE_DYNAMIC } else { D3D11_USAGE_DEFAULT },
            BindFlags: bind_flags(kind).0 as u32,
            CPUAccessFlags: if dynamic { D3D11_CPU_ACCESS_WRITE.0 as u32 } else { 0 },
            MiscFlags: 0,
            StructureByteStride: 0,
        };

        // Constant buffers are created zero-filled at their padded width
        let mut shadow = None;
        let initial: Option<Vec<u8>> = if dynamic {
            let mut bytes = vec![0u8; byte_width as usize];
            if let Some(data) = data {
                bytes[..size].copy_from_slice(&data[..size]);
            }
            shadow = Some(RefCell::new(bytes.clone()));
            Some(bytes)
        } else {
            data.map(|d| d[..size].to_vec())
        };

        let init_data = initial.as_ref().map(|bytes| D3D11_SUBRESOURCE_DATA {
            pSysMem: bytes.as_ptr() as *const c_void,
            SysMemPitch: 0,
            SysMemSlicePitch: 0,
        });

        let mut buffer = None;
        unsafe {
            device
                .CreateBuffer(
                    &desc,
                    init_data.as_ref().map(|d| d as *const _),
                    Some(&mut buffer),
                )
                .map_err(|e| {
                    if e.code() == windows::Win32::Foundation::E_OUTOFMEMORY {
                        Error::OutOfMemory
                    } else {
                        engine_err!(SOURCE, "CreateBuffer ({:?}, {} bytes) failed: {}", kind, size, e)
                    }
                })?;
        }
        let buffer = buffer.ok_or_else(|| engine_err!(SOURCE, "CreateBuffer returned no buffer"))?;

        Ok(Self {
            context: context.clone(),
            buffer,
            kind,
            size,
            shadow,
            slot: UNIFORM_BUFFER_SLOT,
            _tracked: tracked,
        })
    }

    /// Constant buffer register this buffer binds to
    pub(crate) fn with_slot(mut self, slot: u32) -> Self {
        self.slot = slot;
        self
    }

    fn write_shadow(&self, shadow: &RefCell<Vec<u8>>, data: &[u8], offset: usize) -> Result<()> {
        let mut shadow = shadow.borrow_mut();
        shadow[offset..offset + data.len()].copy_from_slice(data);

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe {
            self.context
                .Map(&self.buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped))
                .map_err(|e| engine_err!(SOURCE, "Map of constant buffer failed: {}", e))?;
            std::ptr::copy_nonoverlapping(shadow.as_ptr(), mapped.pData as *mut u8, shadow.len());
            self.context.Unmap(&self.buffer, 0);
        }
        Ok(())
    }
}

impl RenderBuffer for Buffer {
    fn kind(&self) -> BufferKind {
        self.kind
    }

    fn size(&self) -> usize {
        self.size
    }

    fn update_data(&self, data: &[u8], offset: usize) -> Result<()> {
        validate_buffer_update(self.size, data.len(), offset)?;
        if let Some(shadow) = &self.shadow {
            return self.write_shadow(shadow, data, offset);
        }

        let region = D3D11_BOX {
            left: offset as u32,
            top: 0,
            front: 0,
            right: (offset + data.len()) as u32,
            bottom: 1,
            back: 1,
        };
        unsafe {
            self.context.UpdateSubresource(
                &self.buffer,
                0,
                Some(&region),
                data.as_ptr() as *const c_void,
                0,
                0,
            );
        }
        Ok(())
    }

    fn bind(&self) {
        let buffers = [Some(self.buffer.clone())];
        unsafe {
            match self.kind {
                BufferKind::Vertex => {
                    let stride = MeshVertex::STRIDE;
                    let offset = 0u32;
                    self.context
                        .IASetVertexBuffers(0, 1, Some(buffers.as_ptr()), Some(&stride), Some(&offset));
                }
                BufferKind::Index => self.context.IASetIndexBuffer(&self.buffer, DXGI_FORMAT_R32_UINT, 0),
                BufferKind::Uniform => {
                    self.context.VSSetConstantBuffers(self.slot, Some(&buffers));
                    self.context.PSSetConstantBuffers(self.slot, Some(&buffers));
                }
            }
        }
    }

    fn unbind(&self) {
        let empty: [Option<ID3D11Buffer>; 1] = [None];
        unsafe {
            match self.kind {
                BufferKind::Vertex => {
                    let zero = 0u32;
                    self.context
                        .IASetVertexBuffers(0, 1, Some(empty.as_ptr()), Some(&zero), Some(&zero));
                }
                BufferKind::Index => self.context.IASetIndexBuffer(None, DXGI_FORMAT_R32_UINT, 0),
                BufferKind::Uniform => {
                    self.context.VSSetConstantBuffers(self.slot, Some(&empty));
                    self.context.PSSetConstantBuffers(self.slot, Some(&empty));
                }
            }
        }
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::ComPtr(self.buffer.as_raw())
    }
}
