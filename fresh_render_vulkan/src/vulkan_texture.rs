/// Texture - Vulkan implementation of RenderTexture trait
///
/// RGBA8 image in device-local memory. Pixels go through a host-visible
/// staging buffer on a one-shot upload submission. Each texture owns a
/// descriptor set pairing its view with the shared sampler; binding to
/// unit n binds that set as set n.

use ash::vk;
use ash::vk::Handle;
use fresh_render::fresh::pacing::TrackedResource;
use fresh_render::fresh::resource::{
    validate_texture_request, validate_texture_unit, NativeHandle, RenderTexture, TEXTURE_BYTES_PER_PIXEL,
};
use fresh_render::fresh::Result;
use fresh_render::{engine_err, engine_warn};
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::rc::Rc;

use crate::vulkan_device::{RetiredObject, VulkanDevice};
use crate::vulkan_pipeline::VulkanPipeline;
use crate::vulkan_swapchain::{create_image, create_image_view};
use crate::vulkan_util::{SOURCE, TEXTURE_SET_BASE};

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

pub struct Texture {
    device: Rc<VulkanDevice>,
    pipeline: Rc<VulkanPipeline>,
    pub(crate) image: vk::Image,
    view: vk::ImageView,
    descriptor_set: vk::DescriptorSet,
    /// Taken on drop
    allocation: Option<Allocation>,
    width: u32,
    height: u32,
    _tracked: TrackedResource,
}

fn layout_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access_mask)
        .dst_access_mask(dst_access_mask)
}

/// Copy `pixels` into `image` and leave it shader-readable
fn upload_pixels(device: &VulkanDevice, image: vk::Image, width: u32, height: u32, pixels: &[u8]) -> Result<()> {
    let size = width as usize * height as usize * TEXTURE_BYTES_PER_PIXEL;
    let (staging, allocation) = device.create_buffer(
        "Texture staging buffer",
        size as u64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
    )?;

    let result = match allocation.mapped_ptr() {
        Some(mapped) => {
            unsafe { std::ptr::copy_nonoverlapping(pixels.as_ptr(), mapped.as_ptr() as *mut u8, size) };
            device.submit_upload(|command_buffer| unsafe {
                let vk_device = &device.device;
                vk_device.cmd_pipeline_barrier(
                    command_buffer,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[layout_barrier(
                        image,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::AccessFlags::empty(),
                        vk::AccessFlags::TRANSFER_WRITE,
                    )],
                );
                // Row length 0: rows are tightly packed
                let region = vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                    image_extent: vk::Extent3D { width, height, depth: 1 },
                };
                vk_device.cmd_copy_buffer_to_image(
                    command_buffer,
                    staging,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
                vk_device.cmd_pipeline_barrier(
                    command_buffer,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[layout_barrier(
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        vk::AccessFlags::TRANSFER_WRITE,
                        vk::AccessFlags::SHADER_READ,
                    )],
                );
            })
        }
        None => Err(engine_err!(SOURCE, "Texture staging memory is not host-mapped")),
    };

    // The upload has completed (or never ran), so the staging buffer can go now
    unsafe { device.device.destroy_buffer(staging, None) };
    device.free(allocation);
    result
}

/// Allocate-only textures still get moved to a readable layout
fn make_shader_readable(device: &VulkanDevice, image: vk::Image) -> Result<()> {
    device.submit_upload(|command_buffer| unsafe {
        device.device.cmd_pipeline_barrier(
            command_buffer,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[layout_barrier(
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::SHADER_READ,
            )],
        );
    })
}

impl Texture {
    pub(crate) fn new(
        device: Rc<VulkanDevice>,
        pipeline: Rc<VulkanPipeline>,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
        tracked: TrackedResource,
    ) -> Result<Self> {
        validate_texture_request(width, height, data)?;
        let (image, allocation) = create_image(
            &device,
            "Texture",
            vk::Extent2D { width, height },
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )?;

        let prepared = match data {
            Some(pixels) => upload_pixels(&device, image, width, height, pixels),
            None => make_shader_readable(&device, image),
        }
        .and_then(|_| create_image_view(&device.device, image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR))
        .and_then(|view| match pipeline.allocate_texture_set(view) {
            Ok(set) => Ok((view, set)),
            Err(e) => {
                unsafe { device.device.destroy_image_view(view, None) };
                Err(e)
            }
        });

        let (view, descriptor_set) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                device.free(allocation);
                return Err(e);
            }
        };

        Ok(Self {
            device,
            pipeline,
            image,
            view,
            descriptor_set,
            allocation: Some(allocation),
            width,
            height,
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
        let Some(command_buffer) = self.device.recording_command_buffer("Texture bind") else {
            return;
        };
        unsafe {
            self.device.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout(),
                TEXTURE_SET_BASE + unit,
                &[self.descriptor_set],
                &[],
            );
        }
    }

    fn unbind(&self) {
        // Descriptor sets are command-buffer state, replaced by the next bind
    }

    fn native_handle(&self) -> NativeHandle {
        NativeHandle::Vulkan(self.image.as_raw())
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.device.retire(RetiredObject::DescriptorSet(
            self.pipeline.descriptor_pool(),
            self.descriptor_set,
        ));
        if let Some(allocation) = self.allocation.take() {
            self.device.retire(RetiredObject::Image {
                image: self.image,
                view: self.view,
                allocation,
            });
        }
    }
}
