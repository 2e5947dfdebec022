/// Buffer - Direct3D 12 implementation of RenderBuffer trait
///
/// Every buffer is a committed UPLOAD-heap resource that stays mapped for
/// its whole life. Vertex and index updates are plain memory copies. A
/// uniform buffer holds one 256-byte aligned copy per frame slot; the root
/// CBV points at the copy of the current slot.

use fresh_render::fresh::pacing::{TrackedResource, UniformRing};
use fresh_render::fresh::resource::{
    validate_buffer_request, validate_buffer_update, BufferKind, MeshVertex, NativeHandle, RenderBuffer,
};
use fresh_render::fresh::Result;
use fresh_render::engine_err;
use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::Rc;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R32_UINT;

use crate::d3d12_device::{create_buffer_resource, GpuShared};
use crate::d3d12_util::{CONSTANT_BUFFER_ALIGNMENT, ROOT_PARAM_UNIFORM_BUFFER, SOURCE};

pub struct Buffer {
    shared: Rc<GpuShared>,
    pub(crate) resource: ID3D12Resource,
    mapped: *mut u8,
    kind: BufferKind,
    size: usize,
    /// Per-frame copies, uniform buffers only
    uniform: Option<RefCell<UniformRing>>,
    _tracked: TrackedResource,
}

impl Buffer {
    pub(crate) fn new(
        shared: Rc<GpuShared>,
        kind: BufferKind,
        data: Option<&[u8]>,
        size: usize,
        tracked: TrackedResource,
    ) -> Result<Self> {
        validate_buffer_request(kind, data, size)?;
        let ring = match kind {
            BufferKind::Uniform => Some(UniformRing::new(size, CONSTANT_BUFFER_ALIGNMENT, data)),
            BufferKind::Vertex | BufferKind::Index => None,
        };
        let allocation = ring.as_ref().map_or(size, |ring| ring.allocation_size());

        let resource = create_buffer_resource(
            &shared.device,
            D3D12_HEAP_TYPE_UPLOAD,
            allocation as u64,
            D3D12_RESOURCE_STATE_GENERIC_READ,
        )?;

        let mut mapped: *mut c_void = std::ptr::null_mut();
        unsafe {
            // Empty read range: the CPU never reads back
            let no_read = D3D12_RANGE { Begin: 0, End: 0 };
            resource
                .Map(0, Some(&no_read), Some(&mut mapped))
                .map_err(|e| engine_err!(SOURCE, "Map of {:?} buffer failed: {}", kind, e))?;
            let mapped = mapped as *mut u8;
            std::ptr::write_bytes(mapped, 0, allocation);
            if let (Some(data), None) = (data, &ring) {
                std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, size);
            }
        }

        Ok(Self {
            shared,
            resource,
            mapped: mapped as *mut u8,
            kind,
            size,
            uniform: ring.map(RefCell::new),
            _tracked: tracked,
        })
    }

    /// Bring the copy of the current frame slot up to date; returns its offset
    fn sync_uniform_slot(&self, ring: &RefCell<UniformRing>) -> usize {
        let slot = self.shared.frame_slot();
        let mut ring = ring.borrow_mut();
        let offset = ring.slot_offset(slot);
        if let Some(contents) = ring.sync(slot) {
            unsafe {
                std::ptr::copy_nonoverlapping(contents.as_ptr(), self.mapped.add(offset), contents.len());
            }
        }
        offset
    }

    fn gpu_address(&self) -> u64 {
        unsafe { self.resource.GetGPUVirtualAddress() }
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
        if let Some(ring) = &self.uniform {
            // Copies of earlier slots may still be read by the GPU
            ring.borrow_mut().update(data, offset)?;
            self.sync_uniform_slot(ring);
            return Ok(());
        }
        validate_buffer_update(self.size, data.len(), offset)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped.add(offset), data.len());
        }
        Ok(())
    }

    fn bind(&self) {
        let Some(list) = self.shared.recording_list("Buffer bind") else {
            return;
        };
        unsafe {
            match self.kind {
                BufferKind::Vertex => {
                    let view = D3D12_VERTEX_BUFFER_VIEW {
                        BufferLocation: self.gpu_address(),
                        SizeInBytes: self.size as u32,
                        StrideInBytes: MeshVertex::STRIDE,
                    };
                    list.IASetVertexBuffers(0, Some(&[view]));
                }
                BufferKind::Index => {
                    let view = D3D12_INDEX_BUFFER_VIEW {
                        BufferLocation: self.gpu_address(),
                        SizeInBytes: self.size as u32,
                        Format: DXGI_FORMAT_R32_UINT,
                    };
                    list.IASetIndexBuffer(Some(&view));
                }
                BufferKind::Uniform => {
                    let offset = self.uniform.as_ref().map_or(0, |ring| self.sync_uniform_slot(ring));
                    list.SetGraphicsRootConstantBufferView(
                        ROOT_PARAM_UNIFORM_BUFFER,
                        self.gpu_address() + offset as u64,
                    )
                }
            }
        }
    }

    fn unbind(&self) {
        // D3D12 binds are command-list state, overwritten by the next bind
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::ComPtr(self.resource.as_raw())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.resource.Unmap(0, None) };
        self.shared.retire(self.resource.clone(), None);
    }
}
