/// Swapchain - presentation images, depth buffer and framebuffers of one surface
///
/// Rebuilt on resize. Acquire or present reporting the swapchain out of
/// date (or suboptimal) marks it stale; the context refuses to start a
/// frame on a stale swapchain until it has been recreated.

use ash::vk;
use fresh_render::fresh::{Error, Result};
use fresh_render::{engine_debug, engine_err, engine_error};
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::rc::Rc;

use crate::vulkan_device::VulkanDevice;
use crate::vulkan_util::{choose_extent, choose_image_count, choose_present_mode, DEPTH_FORMAT, SOURCE};

/// Window surface, destroyed with its owner
pub(crate) struct Surface {
    device: Rc<VulkanDevice>,
    pub(crate) handle: vk::SurfaceKHR,
}

impl Surface {
    pub(crate) fn new(device: Rc<VulkanDevice>, handle: vk::SurfaceKHR) -> Self {
        Self { device, handle }
    }

    /// Formats the surface offers on the device
    pub(crate) fn formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.device
                .surface_loader
                .get_physical_device_surface_formats(self.device.physical_device, self.handle)
        }
        .map_err(|e| {
            engine_error!(SOURCE, "Failed to query surface formats: {:?}", e);
            Error::InitializationFailed(format!("Failed to get surface formats: {:?}", e))
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { self.device.surface_loader.destroy_surface(self.handle, None) };
    }
}

fn whole_subresource(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// 2D view over the whole of `image`
pub(crate) fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(whole_subresource(aspect_mask));
    unsafe { device.create_image_view(&info, None) }
        .map_err(|e| engine_err!(SOURCE, "Failed to create image view: {:?}", e))
}

/// Device-local 2D image with its memory bound
pub(crate) fn create_image(
    device: &VulkanDevice,
    name: &str,
    extent: vk::Extent2D,
    format: vk::Format,
    usage: vk::ImageUsageFlags,
) -> Result<(vk::Image, Allocation)> {
    let info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);
    unsafe {
        let image = device
            .device
            .create_image(&info, None)
            .map_err(|e| engine_err!(SOURCE, "Failed to create {} ({}x{}): {:?}", name, extent.width, extent.height, e))?;
        let requirements = device.device.get_image_memory_requirements(image);
        let allocation = match device.allocate(name, requirements, MemoryLocation::GpuOnly, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                device.device.destroy_image(image, None);
                return Err(e);
            }
        };
        if let Err(e) = device
            .device
            .bind_image_memory(image, allocation.memory(), allocation.offset())
        {
            device.device.destroy_image(image, None);
            device.free(allocation);
            return Err(engine_err!(SOURCE, "Failed to bind {} memory: {:?}", name, e));
        }
        Ok((image, allocation))
    }
}

pub(crate) struct Swapchain {
    device: Rc<VulkanDevice>,
    handle: vk::SwapchainKHR,
    extent: vk::Extent2D,
    views: Vec<vk::ImageView>,
    depth_image: vk::Image,
    depth_view: vk::ImageView,
    depth_allocation: Option<Allocation>,
    framebuffers: Vec<vk::Framebuffer>,
    /// Signaled by the frame submission, waited on by present; one per image
    present_semaphores: Vec<vk::Semaphore>,
    stale: bool,
}

impl Swapchain {
    /// Swapchain for `surface` rendering through `render_pass`
    ///
    /// `old` (may be null) is handed to the driver for resource reuse; the
    /// caller destroys it afterwards.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        device: Rc<VulkanDevice>,
        surface: vk::SurfaceKHR,
        render_pass: vk::RenderPass,
        format: vk::SurfaceFormatKHR,
        width: u32,
        height: u32,
        vsync: bool,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let (capabilities, present_modes) = unsafe {
            let capabilities = device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, surface)
                .map_err(|e| {
                    engine_error!(SOURCE, "Failed to get surface capabilities: {:?}", e);
                    Error::InitializationFailed(format!("Failed to get surface capabilities: {:?}", e))
                })?;
            let present_modes = device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, surface)
                .map_err(|e| {
                    engine_error!(SOURCE, "Failed to get present modes: {:?}", e);
                    Error::InitializationFailed(format!("Failed to get present modes: {:?}", e))
                })?;
            (capabilities, present_modes)
        };

        let extent = choose_extent(&capabilities, width, height);
        let present_mode = choose_present_mode(&present_modes, vsync);
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(choose_image_count(&capabilities))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let handle = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }.map_err(|e| {
            engine_error!(SOURCE, "Failed to create swapchain ({}x{}): {:?}", width, height, e);
            Error::InitializationFailed(format!("Failed to create swapchain: {:?}", e))
        })?;

        let (depth_image, depth_allocation) = match create_image(
            &device,
            "Depth buffer",
            extent,
            DEPTH_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        ) {
            Ok(depth) => depth,
            Err(e) => {
                unsafe { device.swapchain_loader.destroy_swapchain(handle, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up whatever was created
        let mut swapchain = Self {
            device,
            handle,
            extent,
            views: Vec::new(),
            depth_image,
            depth_view: vk::ImageView::null(),
            depth_allocation: Some(depth_allocation),
            framebuffers: Vec::new(),
            present_semaphores: Vec::new(),
            stale: false,
        };
        swapchain.create_targets(render_pass, format.format)?;

        engine_debug!(
            SOURCE,
            "Swapchain created: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            swapchain.views.len(),
            present_mode
        );
        Ok(swapchain)
    }

    fn create_targets(&mut self, render_pass: vk::RenderPass, format: vk::Format) -> Result<()> {
        let device = &self.device.device;
        let images = unsafe { self.device.swapchain_loader.get_swapchain_images(self.handle) }
            .map_err(|e| engine_err!(SOURCE, "Failed to get swapchain images: {:?}", e))?;

        self.depth_view = create_image_view(device, self.depth_image, DEPTH_FORMAT, vk::ImageAspectFlags::DEPTH)?;
        for image in images {
            let view = create_image_view(device, image, format, vk::ImageAspectFlags::COLOR)?;
            self.views.push(view);

            let attachments = [view, self.depth_view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe { device.create_framebuffer(&framebuffer_info, None) }
                .map_err(|e| engine_err!(SOURCE, "Failed to create framebuffer: {:?}", e))?;
            self.framebuffers.push(framebuffer);

            let semaphore = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
                .map_err(|e| engine_err!(SOURCE, "Failed to create present semaphore: {:?}", e))?;
            self.present_semaphores.push(semaphore);
        }
        Ok(())
    }

    pub(crate) fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub(crate) fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.stale
    }

    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
    }

    pub(crate) fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    pub(crate) fn present_semaphore(&self, image_index: u32) -> vk::Semaphore {
        self.present_semaphores[image_index as usize]
    }

    /// Next image to render into; `signal` fires once it is ready
    pub(crate) fn acquire(&mut self, signal: vk::Semaphore) -> Result<u32> {
        let result = unsafe {
            self.device
                .swapchain_loader
                .acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null())
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    engine_debug!(SOURCE, "Swapchain suboptimal on acquire");
                    self.stale = true;
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.stale = true;
                Err(Error::SwapchainOutOfDate)
            }
            Err(e) => Err(engine_err!(SOURCE, "Failed to acquire swapchain image: {:?}", e)),
        }
    }

    /// Queue `image_index` for display once its present semaphore fires
    ///
    /// An out-of-date result only marks the swapchain stale.
    pub(crate) fn present(&mut self, image_index: u32) -> Result<()> {
        let wait = [self.present_semaphore(image_index)];
        let swapchains = [self.handle];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.device.swapchain_loader.queue_present(self.device.queue, &info) } {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                engine_debug!(SOURCE, "Swapchain out of date on present");
                self.stale = true;
                Ok(())
            }
            Err(e) => Err(engine_err!(SOURCE, "Present failed: {:?}", e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            for &semaphore in &self.present_semaphores {
                device.destroy_semaphore(semaphore, None);
            }
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.views {
                device.destroy_image_view(view, None);
            }
            if self.depth_view != vk::ImageView::null() {
                device.destroy_image_view(self.depth_view, None);
            }
            device.destroy_image(self.depth_image, None);
            self.device.swapchain_loader.destroy_swapchain(self.handle, None);
        }
        if let Some(allocation) = self.depth_allocation.take() {
            self.device.free(allocation);
        }
    }
}
