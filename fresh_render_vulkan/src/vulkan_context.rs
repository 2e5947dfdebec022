/// VulkanRenderContext - Vulkan implementation of RenderContext
///
/// Double-buffered: each frame slot owns a command buffer, an acquire
/// semaphore and a timeline value in a [`FenceRing`]. `end_frame` submits,
/// presents and advances the ring, which blocks until the next slot's
/// previous submission has retired. Only then may `begin_frame` reset that
/// slot's command buffer.

use ash::vk;
use ash::vk::Handle;
use fresh_render::context::validate_swapchain_size;
use fresh_render::fresh::pacing::{FenceRing, GpuTimeline, Lifecycle, ResourceTracker, FRAMES_IN_FLIGHT};
use fresh_render::fresh::resource::{BufferHandle, BufferKind, NativeHandle, ShaderHandle, ShaderSource, TextureHandle};
use fresh_render::fresh::{
    ClearValues, ContextState, Error, GraphicsApi, RenderConfig, RenderContext, RenderWindow, Result, ScissorRect,
    Viewport,
};
use fresh_render::{engine_debug, engine_err, engine_error, engine_info, engine_warn};
use std::any::Any;
use std::rc::Rc;
use std::sync::Arc;

use crate::vulkan_buffer::Buffer;
use crate::vulkan_device::VulkanDevice;
use crate::vulkan_pipeline::VulkanPipeline;
use crate::vulkan_shader::Shader;
use crate::vulkan_swapchain::{Surface, Swapchain};
use crate::vulkan_texture::Texture;
use crate::vulkan_timeline::TimelineSemaphore;
use crate::vulkan_util::{choose_surface_format, SOURCE};

// ============================================================================
// Device and swapchain objects
// ============================================================================

struct DeviceObjects {
    device: Rc<VulkanDevice>,
    pipeline: Rc<VulkanPipeline>,
    timeline: TimelineSemaphore,
    command_pool: vk::CommandPool,
    /// One per frame slot
    command_buffers: Vec<vk::CommandBuffer>,
    /// One per frame slot, signaled when the acquired image is ready
    acquire_semaphores: Vec<vk::Semaphore>,
}

/// Dropped before the device objects: swapchain first, then its surface
struct SwapchainTargets {
    swapchain: Swapchain,
    surface: Surface,
    format: vk::SurfaceFormatKHR,
}

fn create_frame_objects(objects: &mut DeviceObjects) -> Result<()> {
    let device = &objects.device.device;
    unsafe {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(objects.device.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        objects.command_pool = device
            .create_command_pool(&pool_info, None)
            .map_err(|e| engine_err!(SOURCE, "Failed to create frame command pool: {:?}", e))?;

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(objects.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(FRAMES_IN_FLIGHT as u32);
        objects.command_buffers = device
            .allocate_command_buffers(&allocate_info)
            .map_err(|e| engine_err!(SOURCE, "Failed to allocate frame command buffers: {:?}", e))?;

        for _ in 0..FRAMES_IN_FLIGHT {
            let semaphore = device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create acquire semaphore: {:?}", e))?;
            objects.acquire_semaphores.push(semaphore);
        }
    }
    Ok(())
}

fn create_device_objects(config: &RenderConfig, window: &dyn RenderWindow) -> Result<(DeviceObjects, SwapchainTargets)> {
    let (device, surface) = VulkanDevice::new(config, window)?;
    let surface = Surface::new(Rc::clone(&device), surface);
    let format = choose_surface_format(&surface.formats()?).ok_or_else(|| {
        engine_error!(SOURCE, "Surface offers no formats");
        Error::InitializationFailed("surface offers no formats".to_string())
    })?;

    let pipeline = Rc::new(VulkanPipeline::new(Rc::clone(&device), format.format)?);
    let timeline = TimelineSemaphore::new(Rc::clone(&device))?;
    // From here on Drop cleans up whatever was created
    let mut objects = DeviceObjects {
        device,
        pipeline,
        timeline,
        command_pool: vk::CommandPool::null(),
        command_buffers: Vec::new(),
        acquire_semaphores: Vec::new(),
    };
    create_frame_objects(&mut objects)?;

    let (width, height) = window.client_size();
    let swapchain = Swapchain::new(
        Rc::clone(&objects.device),
        surface.handle,
        objects.pipeline.render_pass(),
        format,
        width,
        height,
        config.vsync,
        vk::SwapchainKHR::null(),
    )?;
    Ok((
        objects,
        SwapchainTargets {
            swapchain,
            surface,
            format,
        },
    ))
}

impl Drop for DeviceObjects {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            device.device_wait_idle().ok();
            for &semaphore in &self.acquire_semaphores {
                device.destroy_semaphore(semaphore, None);
            }
            // Frees the command buffers with it
            if self.command_pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.command_pool, None);
            }
        }
    }
}

fn record_viewport(device: &ash::Device, command_buffer: vk::CommandBuffer, viewport: &Viewport) {
    let vp = vk::Viewport {
        x: viewport.x as f32,
        y: viewport.y as f32,
        width: viewport.width as f32,
        height: viewport.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    unsafe { device.cmd_set_viewport(command_buffer, 0, &[vp]) };
}

fn record_scissor(device: &ash::Device, command_buffer: vk::CommandBuffer, scissor: &ScissorRect) {
    // Negative scissor offsets are invalid in Vulkan
    let x = scissor.x.max(0);
    let y = scissor.y.max(0);
    let rect = vk::Rect2D {
        offset: vk::Offset2D { x, y },
        extent: vk::Extent2D {
            width: scissor.width.saturating_sub((x - scissor.x) as u32),
            height: scissor.height.saturating_sub((y - scissor.y) as u32),
        },
    };
    unsafe { device.cmd_set_scissor(command_buffer, 0, &[rect]) };
}

// ============================================================================
// Context
// ============================================================================

/// Vulkan render context
pub struct VulkanRenderContext {
    config: RenderConfig,
    lifecycle: Lifecycle,
    fences: FenceRing<FRAMES_IN_FLIGHT>,
    tracker: ResourceTracker,

    window: Option<Arc<dyn RenderWindow>>,
    targets: Option<SwapchainTargets>,
    objects: Option<DeviceObjects>,

    swapchain_size: (u32, u32),
    image_index: u32,
    clear: ClearValues,
    viewport: Viewport,
    scissor: ScissorRect,
}

impl VulkanRenderContext {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(SOURCE),
            fences: FenceRing::new(),
            tracker: ResourceTracker::new(),
            window: None,
            targets: None,
            objects: None,
            swapchain_size: (0, 0),
            image_index: 0,
            clear: ClearValues::default(),
            viewport: Viewport::default(),
            scissor: ScissorRect::default(),
        }
    }

    pub fn device(&self) -> Option<&ash::Device> {
        self.objects.as_ref().map(|o| &o.device.device)
    }

    pub fn physical_device_name(&self) -> Option<&str> {
        self.objects.as_ref().map(|o| o.device.name.as_str())
    }

    /// The frame's command buffer, for callers recording their own draws
    ///
    /// Only recording between `begin_frame` and `end_frame`, inside the
    /// render pass.
    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        if self.lifecycle.is_recording() {
            self.objects.as_ref().map(|o| o.command_buffers[self.fences.index()])
        } else {
            None
        }
    }

    pub fn render_pass(&self) -> Option<vk::RenderPass> {
        self.objects.as_ref().map(|o| o.pipeline.render_pass())
    }

    pub fn pipeline_layout(&self) -> Option<vk::PipelineLayout> {
        self.objects.as_ref().map(|o| o.pipeline.layout())
    }

    /// Timeline value the current frame slot will signal
    pub fn current_fence_value(&self) -> u64 {
        self.fences.current_value()
    }

    /// Last value the frame timeline has reached on the GPU
    pub fn completed_fence_value(&self) -> u64 {
        self.objects.as_ref().map(|o| o.timeline.completed_value()).unwrap_or(0)
    }

    fn objects(&self) -> Result<&DeviceObjects> {
        self.objects.as_ref().ok_or(Error::NotInitialized)
    }

    fn create_buffer(&mut self, kind: BufferKind, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.lifecycle.require_initialized("create_buffer")?;
        let objects = self.objects()?;
        let buffer = Buffer::new(
            Rc::clone(&objects.device),
            &objects.pipeline,
            kind,
            data,
            size,
            self.tracker.track(),
        )?;
        engine_debug!(SOURCE, "Created {:?} buffer ({} bytes)", kind, size);
        Ok(Rc::new(buffer))
    }

    /// Clear rectangle covering the whole swapchain
    fn full_clear_rect(&self) -> vk::ClearRect {
        let extent = self
            .targets
            .as_ref()
            .map(|t| t.swapchain.extent())
            .unwrap_or_default();
        vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    fn record_clear(&self, attachment: vk::ClearAttachment) {
        if let Some(command_buffer) = self.command_buffer() {
            if let Some(objects) = &self.objects {
                unsafe {
                    objects
                        .device
                        .device
                        .cmd_clear_attachments(command_buffer, &[attachment], &[self.full_clear_rect()])
                };
            }
        }
    }

    /// Signal, advance the ring and free what the GPU finished with
    fn advance_frame(&mut self) -> Result<()> {
        let objects = self.objects.as_mut().ok_or(Error::NotInitialized)?;
        let slot = self.fences.advance(&mut objects.timeline)?;
        objects.device.set_frame_slot(slot);
        objects.device.collect_retired(objects.timeline.completed_value());
        Ok(())
    }

    /// Signal the current slot and block until the queue is empty
    fn drain_gpu(&mut self) -> Result<()> {
        let objects = self.objects.as_mut().ok_or(Error::NotInitialized)?;
        self.fences.wait_idle(&mut objects.timeline)?;
        // Presentation is outside the timeline
        objects.device.wait_idle()?;
        objects.device.release_all_retired();
        Ok(())
    }

    fn finish_rebuild(&mut self, width: u32, height: u32) {
        self.fences.reset_after_resize(self.fences.index());
        if let Some(objects) = &self.objects {
            objects.device.set_frame_slot(self.fences.index());
        }
        self.swapchain_size = (width, height);
        self.viewport = Viewport::full(width, height);
        self.scissor = Viewport::full(width, height);
        engine_debug!(SOURCE, "Swapchain rebuilt at {}x{}", width, height);
    }
}

impl RenderContext for VulkanRenderContext {
    fn api(&self) -> GraphicsApi {
        GraphicsApi::Vulkan
    }

    fn state(&self) -> ContextState {
        self.lifecycle.state()
    }

    fn initialize(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.begin_initialize()?;
        let (width, height) = window.client_size();
        validate_swapchain_size(width, height)?;

        let (objects, targets) = create_device_objects(&self.config, window.as_ref())?;
        let extent = targets.swapchain.extent();
        let device_name = objects.device.name.clone();
        self.objects = Some(objects);
        self.targets = Some(targets);
        self.window = Some(window);
        self.fences = FenceRing::new();
        self.finish_rebuild(width, height);
        self.lifecycle.mark_initialized();
        engine_info!(
            SOURCE,
            "Vulkan render context initialized on '{}' ({}x{})",
            device_name,
            extent.width,
            extent.height
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        if !self.lifecycle.shut_down() {
            return;
        }
        if let Some(objects) = &self.objects {
            objects.device.set_recording(None);
        }
        if let Err(e) = self.drain_gpu() {
            engine_warn!(SOURCE, "GPU drain before shutdown failed: {}", e);
        }
        self.tracker.warn_leaks(SOURCE);
        self.targets = None;
        self.objects = None;
        self.window = None;
        #[cfg(feature = "vulkan-validation")]
        {
            if self.config.enable_validation {
                crate::debug::print_validation_stats_report();
            }
        }
        engine_info!(SOURCE, "Vulkan render context shut down");
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.lifecycle.check_begin_frame()?;
        if let Some(window) = &self.window {
            if window.client_size() != self.swapchain_size {
                return Err(Error::SwapchainOutOfDate);
            }
        }
        let (width, height) = self.swapchain_size;
        self.viewport = Viewport::full(width, height);
        self.scissor = Viewport::full(width, height);

        let slot = self.fences.index();
        let objects = self.objects.as_ref().ok_or(Error::NotInitialized)?;
        let targets = self.targets.as_mut().ok_or(Error::SwapchainOutOfDate)?;
        if targets.swapchain.is_stale() {
            engine_debug!(SOURCE, "begin_frame on a stale swapchain");
            return Err(Error::SwapchainOutOfDate);
        }
        let image_index = targets.swapchain.acquire(objects.acquire_semaphores[slot])?;
        let command_buffer = objects.command_buffers[slot];
        let device = &objects.device.device;

        // The previous end_frame waited for this slot's timeline value, so
        // the command buffer is no longer in use by the GPU
        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| engine_err!(SOURCE, "Command buffer reset failed: {:?}", e))?;
            let begin_info =
                vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(|e| engine_err!(SOURCE, "Command buffer begin failed: {:?}", e))?;

            let clear_values = [
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: self.clear.color,
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: self.clear.depth,
                        stencil: 0,
                    },
                },
            ];
            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(objects.pipeline.render_pass())
                .framebuffer(targets.swapchain.framebuffer(image_index))
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: targets.swapchain.extent(),
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
        }
        record_viewport(device, command_buffer, &self.viewport);
        record_scissor(device, command_buffer, &self.scissor);

        objects.device.set_submit_value(self.fences.current_value());
        objects.device.set_recording(Some(command_buffer));
        self.image_index = image_index;
        self.lifecycle.begin_recording();
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        self.lifecycle.check_end_frame()?;
        let objects = self.objects.as_ref().ok_or(Error::NotInitialized)?;
        objects.device.set_recording(None);
        let slot = self.fences.index();
        let command_buffer = objects.command_buffers[slot];
        let device = &objects.device.device;

        let submitted = match self.targets.as_mut() {
            Some(targets) => unsafe {
                device.cmd_end_render_pass(command_buffer);
                device
                    .end_command_buffer(command_buffer)
                    .map_err(|e| engine_err!(SOURCE, "Command buffer end failed: {:?}", e))
                    .and_then(|_| {
                        let wait = [objects.acquire_semaphores[slot]];
                        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
                        let command_buffers = [command_buffer];
                        let signal = [targets.swapchain.present_semaphore(self.image_index)];
                        let submit_info = vk::SubmitInfo::default()
                            .wait_semaphores(&wait)
                            .wait_dst_stage_mask(&stages)
                            .command_buffers(&command_buffers)
                            .signal_semaphores(&signal);
                        device
                            .queue_submit(objects.device.queue, &[submit_info], vk::Fence::null())
                            .map_err(|e| engine_err!(SOURCE, "Frame submission failed: {:?}", e))
                    })
                    .and_then(|_| targets.swapchain.present(self.image_index))
            },
            None => Err(Error::SwapchainOutOfDate),
        };

        // The ring moves whatever the present outcome
        let advanced = self.advance_frame();
        self.lifecycle.end_recording();
        submitted.and(advanced)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.lifecycle.require_initialized("wait_idle")?;
        self.drain_gpu()
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = Viewport { x, y, width, height };
        if let (Some(command_buffer), Some(objects)) = (self.command_buffer(), &self.objects) {
            record_viewport(&objects.device.device, command_buffer, &self.viewport);
        }
    }

    fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.scissor = ScissorRect { x, y, width, height };
        if let (Some(command_buffer), Some(objects)) = (self.command_buffer(), &self.objects) {
            record_scissor(&objects.device.device, command_buffer, &self.scissor);
        }
    }

    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear.color = [r, g, b, a];
        self.record_clear(vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear.color,
                },
            },
        });
    }

    fn clear_depth(&mut self, depth: f32) {
        self.clear.depth = depth;
        self.record_clear(vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            color_attachment: 0,
            clear_value: vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        });
    }

    fn create_vertex_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.create_buffer(BufferKind::Vertex, data, size)
    }

    fn create_index_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.create_buffer(BufferKind::Index, data, size)
    }

    fn create_uniform_buffer(&mut self, data: Option<&[u8]>, size: usize) -> Result<BufferHandle> {
        self.create_buffer(BufferKind::Uniform, data, size)
    }

    fn create_texture(&mut self, width: u32, height: u32, data: Option<&[u8]>) -> Result<TextureHandle> {
        self.lifecycle.require_initialized("create_texture")?;
        let objects = self.objects()?;
        let texture = Texture::new(
            Rc::clone(&objects.device),
            Rc::clone(&objects.pipeline),
            width,
            height,
            data,
            self.tracker.track(),
        )?;
        engine_debug!(SOURCE, "Created {}x{} texture", width, height);
        Ok(Rc::new(texture))
    }

    fn create_shader(&mut self, vertex: &ShaderSource, fragment: &ShaderSource) -> Result<ShaderHandle> {
        self.lifecycle.require_initialized("create_shader")?;
        let objects = self.objects()?;
        let shader = Shader::new(
            Rc::clone(&objects.device),
            Rc::clone(&objects.pipeline),
            vertex,
            fragment,
            self.tracker.track(),
        )?;
        Ok(Rc::new(shader))
    }

    fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        self.lifecycle.require_idle("recreate_swapchain")?;
        validate_swapchain_size(width, height)?;
        self.drain_gpu()?;

        let objects = self.objects.as_ref().ok_or(Error::NotInitialized)?;
        let mut targets = self.targets.take().ok_or(Error::NotInitialized)?;
        let rebuilt = Swapchain::new(
            Rc::clone(&objects.device),
            targets.surface.handle,
            objects.pipeline.render_pass(),
            targets.format,
            width,
            height,
            self.config.vsync,
            targets.swapchain.handle(),
        );
        match rebuilt {
            Ok(swapchain) => {
                // The old swapchain was retired by the creation above
                targets.swapchain = swapchain;
                self.targets = Some(targets);
            }
            Err(e) => {
                // Keep the surface; frames stay refused until a rebuild succeeds
                targets.swapchain.mark_stale();
                self.targets = Some(targets);
                return Err(e);
            }
        }
        self.finish_rebuild(width, height);
        Ok(())
    }

    fn set_viewport_window(&mut self, window: Arc<dyn RenderWindow>) -> Result<()> {
        self.lifecycle.require_idle("set_viewport_window")?;
        let (width, height) = window.client_size();
        validate_swapchain_size(width, height)?;
        self.drain_gpu()?;

        // One surface per native window: the old one goes first
        self.targets = None;
        let objects = self.objects()?;
        let surface = Surface::new(Rc::clone(&objects.device), objects.device.create_surface(window.as_ref())?);
        if !objects.device.can_present(surface.handle) {
            engine_error!(SOURCE, "The device queue cannot present to the new window");
            return Err(Error::InitializationFailed(
                "device queue cannot present to the new window".to_string(),
            ));
        }
        // Framebuffers are built for the render pass, so the format must match
        let color_format = objects.pipeline.color_format();
        let format = surface
            .formats()?
            .into_iter()
            .find(|f| f.format == color_format)
            .ok_or_else(|| {
                engine_error!(SOURCE, "The new window's surface does not support {:?}", color_format);
                Error::InitializationFailed(format!("surface does not support {:?}", color_format))
            })?;

        let swapchain = Swapchain::new(
            Rc::clone(&objects.device),
            surface.handle,
            objects.pipeline.render_pass(),
            format,
            width,
            height,
            self.config.vsync,
            vk::SwapchainKHR::null(),
        )?;
        self.targets = Some(SwapchainTargets {
            swapchain,
            surface,
            format,
        });
        self.window = Some(window);
        self.finish_rebuild(width, height);
        Ok(())
    }

    fn swapchain_width(&self) -> u32 {
        self.swapchain_size.0
    }

    fn swapchain_height(&self) -> u32 {
        self.swapchain_size.1
    }

    fn frame_index(&self) -> usize {
        self.fences.index()
    }

    fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    fn native_device(&self) -> NativeHandle {
        match &self.objects {
            Some(objects) => NativeHandle::Vulkan(objects.device.device.handle().as_raw()),
            None => NativeHandle::Null,
        }
    }

    fn live_resource_count(&self) -> usize {
        self.tracker.live_count()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for VulkanRenderContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
