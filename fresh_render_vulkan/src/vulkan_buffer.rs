/// Buffer - Vulkan implementation of RenderBuffer trait
///
/// Buffers live in host-visible memory that stays mapped for their whole
/// life. Vertex and index updates are plain memory copies. A uniform buffer
/// holds one aligned copy per frame slot and is bound as a dynamic uniform
/// buffer at set 0, binding 0, offset to the copy of the current slot.

use ash::vk;
use ash::vk::Handle;
use fresh_render::fresh::pacing::{TrackedResource, UniformRing};
use fresh_render::fresh::resource::{
    validate_buffer_request, validate_buffer_update, BufferKind, NativeHandle, RenderBuffer,
};
use fresh_render::fresh::{Error, Result};
use fresh_render::{engine_err, engine_error};
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::cell::RefCell;
use std::rc::Rc;

use crate::vulkan_device::{RetiredObject, VulkanDevice};
use crate::vulkan_pipeline::VulkanPipeline;
use crate::vulkan_util::{SOURCE, UNIFORM_BUFFER_SET};

fn buffer_usage(kind: BufferKind) -> vk::BufferUsageFlags {
    match kind {
        BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
    }
}

/// Per-frame copies of a uniform buffer and the set that reads them
struct UniformCopies {
    pipeline: Rc<VulkanPipeline>,
    descriptor_set: vk::DescriptorSet,
    ring: RefCell<UniformRing>,
}

pub struct Buffer {
    device: Rc<VulkanDevice>,
    pub(crate) buffer: vk::Buffer,
    /// Taken on drop
    allocation: Option<Allocation>,
    mapped: *mut u8,
    kind: BufferKind,
    size: usize,
    uniform: Option<UniformCopies>,
    _tracked: TrackedResource,
}

impl Buffer {
    pub(crate) fn new(
        device: Rc<VulkanDevice>,
        pipeline: &Rc<VulkanPipeline>,
        kind: BufferKind,
        data: Option<&[u8]>,
        size: usize,
        tracked: TrackedResource,
    ) -> Result<Self> {
        validate_buffer_request(kind, data, size)?;
        let ring = match kind {
            BufferKind::Uniform => {
                if size as u64 > u64::from(device.max_uniform_range) {
                    engine_error!(
                        SOURCE,
                        "Uniform buffer of {} bytes exceeds the device range of {}",
                        size,
                        device.max_uniform_range
                    );
                    return Err(Error::InvalidResource(format!(
                        "uniform buffer of {} bytes, device limit {}",
                        size, device.max_uniform_range
                    )));
                }
                Some(UniformRing::new(size, device.min_uniform_alignment as usize, data))
            }
            BufferKind::Vertex | BufferKind::Index => None,
        };
        let allocation_size = ring.as_ref().map_or(size, |ring| ring.allocation_size());

        let name = format!("{:?} buffer", kind);
        let (buffer, allocation) = device.create_buffer(
            &name,
            allocation_size as u64,
            buffer_usage(kind),
            MemoryLocation::CpuToGpu,
        )?;

        let mapped = match allocation.mapped_ptr() {
            Some(ptr) => ptr.as_ptr() as *mut u8,
            None => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                device.free(allocation);
                return Err(engine_err!(SOURCE, "{} memory is not host-mapped", name));
            }
        };
        unsafe {
            std::ptr::write_bytes(mapped, 0, allocation_size);
            if let (Some(data), None) = (data, &ring) {
                std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, size);
            }
        }

        let uniform = match ring {
            Some(ring) => match pipeline.allocate_uniform_set(buffer, size as u64) {
                Ok(descriptor_set) => Some(UniformCopies {
                    pipeline: Rc::clone(pipeline),
                    descriptor_set,
                    ring: RefCell::new(ring),
                }),
                Err(e) => {
                    unsafe { device.device.destroy_buffer(buffer, None) };
                    device.free(allocation);
                    return Err(e);
                }
            },
            None => None,
        };

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            mapped,
            kind,
            size,
            uniform,
            _tracked: tracked,
        })
    }

    /// Bring the copy of the current frame slot up to date; returns its offset
    fn sync_uniform_slot(&self, uniform: &UniformCopies) -> usize {
        let slot = self.device.frame_slot();
        let mut ring = uniform.ring.borrow_mut();
        let offset = ring.slot_offset(slot);
        if let Some(contents) = ring.sync(slot) {
            unsafe {
                std::ptr::copy_nonoverlapping(contents.as_ptr(), self.mapped.add(offset), contents.len());
            }
        }
        offset
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
        if let Some(uniform) = &self.uniform {
            // Copies of earlier slots may still be read by the GPU
            uniform.ring.borrow_mut().update(data, offset)?;
            self.sync_uniform_slot(uniform);
            return Ok(());
        }
        validate_buffer_update(self.size, data.len(), offset)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped.add(offset), data.len());
        }
        Ok(())
    }

    fn bind(&self) {
        let Some(command_buffer) = self.device.recording_command_buffer("Buffer bind") else {
            return;
        };
        let device = &self.device.device;
        unsafe {
            match self.kind {
                BufferKind::Vertex => device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.buffer], &[0]),
                BufferKind::Index => {
                    device.cmd_bind_index_buffer(command_buffer, self.buffer, 0, vk::IndexType::UINT32)
                }
                BufferKind::Uniform => {
                    if let Some(uniform) = &self.uniform {
                        let offset = self.sync_uniform_slot(uniform);
                        device.cmd_bind_descriptor_sets(
                            command_buffer,
                            vk::PipelineBindPoint::GRAPHICS,
                            uniform.pipeline.layout(),
                            UNIFORM_BUFFER_SET,
                            &[uniform.descriptor_set],
                            &[offset as u32],
                        );
                    }
                }
            }
        }
    }

    fn unbind(&self) {
        // Vulkan binds are command-buffer state, overwritten by the next bind
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::Vulkan(self.buffer.as_raw())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(uniform) = &self.uniform {
            self.device.retire(RetiredObject::DescriptorSet(
                uniform.pipeline.descriptor_pool(),
                uniform.descriptor_set,
            ));
        }
        if let Some(allocation) = self.allocation.take() {
            self.device.retire(RetiredObject::Buffer(self.buffer, allocation));
        }
    }
}
