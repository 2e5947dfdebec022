/// VulkanDevice - instance, logical device and allocator shared by every Vulkan object
///
/// Held through an `Rc` by the context and by each resource; the last
/// owner to go destroys the allocator, the device and the instance.
/// Objects dropped while frames may still use them are parked with the
/// timeline value of the frame being recorded and destroyed once the GPU
/// has passed it.

use ash::vk;
use fresh_render::fresh::{Error, RenderConfig, RenderWindow, Result};
use fresh_render::{engine_err, engine_error, engine_info, engine_warn};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::cell::{Cell, RefCell};
use std::ffi::{c_char, CString};
use std::mem::ManuallyDrop;
use std::rc::Rc;

use crate::device_selection::{select_physical_device, PhysicalDeviceQuery};
use crate::vulkan_util::SOURCE;

// ============================================================================
// Physical device query
// ============================================================================

/// Query over the physical devices of an instance, for one surface
pub(crate) struct AshDeviceQuery<'a> {
    pub instance: &'a ash::Instance,
    pub surface_loader: &'a ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
}

impl PhysicalDeviceQuery for AshDeviceQuery<'_> {
    type Device = vk::PhysicalDevice;

    fn devices(&self) -> Result<Vec<vk::PhysicalDevice>> {
        unsafe { self.instance.enumerate_physical_devices() }.map_err(|e| {
            engine_error!(SOURCE, "Failed to enumerate physical devices: {:?}", e);
            Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
        })
    }

    fn name(&self, device: vk::PhysicalDevice) -> String {
        let properties = unsafe { self.instance.get_physical_device_properties(device) };
        properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "<unnamed>".to_string())
    }

    fn api_version(&self, device: vk::PhysicalDevice) -> u32 {
        unsafe { self.instance.get_physical_device_properties(device) }.api_version
    }

    fn supports_swapchain(&self, device: vk::PhysicalDevice) -> bool {
        let Ok(extensions) = (unsafe { self.instance.enumerate_device_extension_properties(device) }) else {
            return false;
        };
        extensions
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(ash::khr::swapchain::NAME))
    }

    fn max_bound_descriptor_sets(&self, device: vk::PhysicalDevice) -> u32 {
        unsafe { self.instance.get_physical_device_properties(device) }
            .limits
            .max_bound_descriptor_sets
    }

    fn queue_family_count(&self, device: vk::PhysicalDevice) -> u32 {
        unsafe { self.instance.get_physical_device_queue_family_properties(device) }.len() as u32
    }

    fn supports_graphics(&self, device: vk::PhysicalDevice, family: u32) -> bool {
        unsafe { self.instance.get_physical_device_queue_family_properties(device) }
            .get(family as usize)
            .is_some_and(|props| props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
    }

    fn supports_present(&self, device: vk::PhysicalDevice, family: u32) -> bool {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(device, family, self.surface)
                .unwrap_or(false)
        }
    }
}

// ============================================================================
// Instance helpers
// ============================================================================

/// Validation layer and debug messenger, when compiled in and requested
#[cfg(feature = "vulkan-validation")]
fn validation_layers(enabled: bool) -> Vec<*const c_char> {
    if enabled {
        vec![crate::debug::VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    }
}

#[cfg(not(feature = "vulkan-validation"))]
fn validation_layers(enabled: bool) -> Vec<*const c_char> {
    if enabled {
        engine_warn!(SOURCE, "Validation requested but the vulkan-validation feature is not compiled in");
    }
    Vec::new()
}

type DebugMessenger = (ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT);

#[cfg(feature = "vulkan-validation")]
fn create_debug_messenger(entry: &ash::Entry, instance: &ash::Instance) -> Result<DebugMessenger> {
    crate::debug::reset_validation_stats();
    let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);
    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&crate::debug::messenger_create_info(), None) }
        .map_err(|e| {
            engine_error!(SOURCE, "Failed to create debug messenger: {:?}", e);
            Error::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
        })?;
    Ok((debug_utils, messenger))
}

#[cfg(not(feature = "vulkan-validation"))]
fn create_debug_messenger(_entry: &ash::Entry, _instance: &ash::Instance) -> Result<DebugMessenger> {
    Err(Error::InitializationFailed("vulkan-validation feature not compiled in".to_string()))
}

/// Surface for `window` on `instance`
pub(crate) fn create_surface(
    entry: &ash::Entry,
    instance: &ash::Instance,
    window: &dyn RenderWindow,
) -> Result<vk::SurfaceKHR> {
    let display_handle = window.display_handle().map_err(|e| {
        engine_error!(SOURCE, "Failed to get display handle: {}", e);
        Error::InitializationFailed(format!("Failed to get display handle: {}", e))
    })?;
    let window_handle = window.window_handle().map_err(|e| {
        engine_error!(SOURCE, "Failed to get window handle: {}", e);
        Error::InitializationFailed(format!("Failed to get window handle: {}", e))
    })?;
    unsafe {
        ash_window::create_surface(entry, instance, display_handle.as_raw(), window_handle.as_raw(), None).map_err(
            |e| {
                engine_error!(SOURCE, "Failed to create surface: {:?}", e);
                Error::InitializationFailed(format!("Failed to create surface: {:?}", e))
            },
        )
    }
}

fn create_instance(
    entry: &ash::Entry,
    config: &RenderConfig,
    window: &dyn RenderWindow,
) -> Result<(ash::Instance, bool)> {
    let app_name = CString::new(config.app_name.replace('\0', "")).unwrap_or_default();
    let (major, minor, patch) = config.app_version;
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, major, minor, patch))
        .engine_name(c"Fresh")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let display_handle = window.display_handle().map_err(|e| {
        engine_error!(SOURCE, "Failed to get display handle: {}", e);
        Error::InitializationFailed(format!("Failed to get display handle: {}", e))
    })?;
    let mut extension_names = ash_window::enumerate_required_extensions(display_handle.as_raw())
        .map_err(|e| {
            engine_error!(SOURCE, "Failed to get required extensions: {}", e);
            Error::InitializationFailed(format!("Failed to get required extensions: {}", e))
        })?
        .to_vec();

    let layer_names = validation_layers(config.enable_validation);
    let validation = !layer_names.is_empty();
    if validation {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layer_names)
        .enabled_extension_names(&extension_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        engine_error!(SOURCE, "Failed to create Vulkan instance: {:?}", e);
        Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
    })?;
    Ok((instance, validation))
}

// ============================================================================
// Retired objects
// ============================================================================

/// GPU object whose owner dropped it while a frame may still use it
pub(crate) enum RetiredObject {
    Buffer(vk::Buffer, Allocation),
    Image {
        image: vk::Image,
        view: vk::ImageView,
        allocation: Allocation,
    },
    DescriptorSet(vk::DescriptorPool, vk::DescriptorSet),
    Pipeline(vk::Pipeline),
}

struct Retired {
    value: u64,
    object: RetiredObject,
}

// ============================================================================
// Device
// ============================================================================

pub struct VulkanDevice {
    entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    pub(crate) surface_loader: ash::khr::surface::Instance,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) name: String,
    pub(crate) device: ash::Device,
    pub(crate) queue: vk::Queue,
    pub(crate) queue_family: u32,
    /// Offset alignment of uniform buffer copies
    pub(crate) min_uniform_alignment: u64,
    /// Largest uniform buffer range one descriptor can see
    pub(crate) max_uniform_range: u32,
    /// Dropped before the device is destroyed
    allocator: ManuallyDrop<RefCell<Allocator>>,
    upload_pool: vk::CommandPool,
    recording: Cell<Option<vk::CommandBuffer>>,
    submit_value: Cell<u64>,
    frame_slot: Cell<usize>,
    retired: RefCell<Vec<Retired>>,
}

impl VulkanDevice {
    /// Instance, surface for `window`, first qualifying GPU and its device
    pub(crate) fn new(config: &RenderConfig, window: &dyn RenderWindow) -> Result<(Rc<Self>, vk::SurfaceKHR)> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            engine_error!(SOURCE, "Failed to load Vulkan library: {:?}", e);
            Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
        })?;

        let (instance, validation) = create_instance(&entry, config, window)?;
        let debug_messenger = if validation {
            match create_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    engine_warn!(SOURCE, "Continuing without debug messenger: {}", e);
                    None
                }
            }
        } else {
            None
        };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let destroy_instance = |surface: Option<vk::SurfaceKHR>| unsafe {
            if let Some(surface) = surface {
                surface_loader.destroy_surface(surface, None);
            }
            if let Some((debug_utils, messenger)) = &debug_messenger {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            instance.destroy_instance(None);
        };

        let surface = match create_surface(&entry, &instance, window) {
            Ok(surface) => surface,
            Err(e) => {
                destroy_instance(None);
                return Err(e);
            }
        };

        let query = AshDeviceQuery {
            instance: &instance,
            surface_loader: &surface_loader,
            surface,
        };
        let selected = match select_physical_device(&query) {
            Ok(selected) => selected,
            Err(e) => {
                destroy_instance(Some(surface));
                return Err(e);
            }
        };

        let queue_priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(selected.queue_family)
            .queue_priorities(&queue_priorities)];
        let device_extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .push_next(&mut features12);

        let device = match unsafe { instance.create_device(selected.device, &device_info, None) } {
            Ok(device) => device,
            Err(e) => {
                engine_error!(SOURCE, "Failed to create logical device: {:?}", e);
                destroy_instance(Some(surface));
                return Err(Error::InitializationFailed(format!("Failed to create device: {:?}", e)));
            }
        };
        let queue = unsafe { device.get_device_queue(selected.queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: selected.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let upload_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(selected.queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let upload_pool = unsafe { device.create_command_pool(&upload_pool_info, None) };

        let (allocator, upload_pool) = match (allocator, upload_pool) {
            (Ok(allocator), Ok(pool)) => (allocator, pool),
            (allocator, pool) => {
                engine_error!(
                    SOURCE,
                    "Failed to create GPU allocator or upload pool: {:?} / {:?}",
                    allocator.as_ref().err(),
                    pool.as_ref().err()
                );
                unsafe {
                    if let Ok(pool) = pool {
                        device.destroy_command_pool(pool, None);
                    }
                    drop(allocator);
                    device.destroy_device(None);
                }
                destroy_instance(Some(surface));
                return Err(Error::InitializationFailed("GPU allocator creation failed".to_string()));
            }
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let limits = unsafe { instance.get_physical_device_properties(selected.device) }.limits;
        engine_info!(SOURCE, "Vulkan device created on '{}'", selected.name);

        let device = Rc::new(Self {
            entry,
            instance,
            debug_messenger,
            surface_loader,
            swapchain_loader,
            physical_device: selected.device,
            name: selected.name,
            device,
            queue,
            queue_family: selected.queue_family,
            min_uniform_alignment: limits.min_uniform_buffer_offset_alignment,
            max_uniform_range: limits.max_uniform_buffer_range,
            allocator: ManuallyDrop::new(RefCell::new(allocator)),
            upload_pool,
            recording: Cell::new(None),
            submit_value: Cell::new(1),
            frame_slot: Cell::new(0),
            retired: RefCell::new(Vec::new()),
        });
        Ok((device, surface))
    }

    /// Another surface on this instance (for `set_viewport_window`)
    pub(crate) fn create_surface(&self, window: &dyn RenderWindow) -> Result<vk::SurfaceKHR> {
        create_surface(&self.entry, &self.instance, window)
    }

    /// Whether the device queue can present to `surface`
    pub(crate) fn can_present(&self, surface: vk::SurfaceKHR) -> bool {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_support(self.physical_device, self.queue_family, surface)
                .unwrap_or(false)
        }
    }

    // ------------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------------

    pub(crate) fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        self.allocator
            .borrow_mut()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                engine_error!(
                    SOURCE,
                    "Out of GPU memory for {} ({:.2} MB): {:?}",
                    name,
                    requirements.size as f64 / (1024.0 * 1024.0),
                    e
                );
                Error::OutOfMemory
            })
    }

    pub(crate) fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.borrow_mut().free(allocation) {
            engine_warn!(SOURCE, "Failed to free GPU allocation: {:?}", e);
        }
    }

    /// Buffer bound to fresh memory at `location`
    pub(crate) fn create_buffer(
        &self,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<(vk::Buffer, Allocation)> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe {
            let buffer = self
                .device
                .create_buffer(&info, None)
                .map_err(|e| engine_err!(SOURCE, "Failed to create {} ({} bytes): {:?}", name, size, e))?;
            let requirements = self.device.get_buffer_memory_requirements(buffer);
            let allocation = match self.allocate(name, requirements, location, true) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };
            if let Err(e) = self
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            {
                self.device.destroy_buffer(buffer, None);
                self.free(allocation);
                return Err(engine_err!(SOURCE, "Failed to bind {} memory: {:?}", name, e));
            }
            Ok((buffer, allocation))
        }
    }

    // ------------------------------------------------------------------------
    // Frame recording
    // ------------------------------------------------------------------------

    pub(crate) fn set_recording(&self, command_buffer: Option<vk::CommandBuffer>) {
        self.recording.set(command_buffer);
    }

    /// Timeline value the frame being recorded will signal
    pub(crate) fn set_submit_value(&self, value: u64) {
        self.submit_value.set(value);
    }

    /// Frame slot the CPU may write; the GPU is done with its last submission
    pub(crate) fn set_frame_slot(&self, slot: usize) {
        self.frame_slot.set(slot);
    }

    pub(crate) fn frame_slot(&self) -> usize {
        self.frame_slot.get()
    }

    /// The frame command buffer, or None outside begin_frame/end_frame
    pub(crate) fn current_command_buffer(&self) -> Option<vk::CommandBuffer> {
        self.recording.get()
    }

    /// Same as `current_command_buffer`, warning that `operation` is dropped
    pub(crate) fn recording_command_buffer(&self, operation: &str) -> Option<vk::CommandBuffer> {
        let command_buffer = self.recording.get();
        if command_buffer.is_none() {
            engine_warn!(SOURCE, "{} ignored outside a frame", operation);
        }
        command_buffer
    }

    // ------------------------------------------------------------------------
    // Deferred destruction
    // ------------------------------------------------------------------------

    /// Keep `object` alive until the frame being recorded completes
    pub(crate) fn retire(&self, object: RetiredObject) {
        self.retired.borrow_mut().push(Retired {
            value: self.submit_value.get(),
            object,
        });
    }

    /// Destroy retired objects whose frame the GPU has finished
    pub(crate) fn collect_retired(&self, completed_value: u64) -> usize {
        let done: Vec<Retired> = {
            let mut retired = self.retired.borrow_mut();
            let (done, pending) = std::mem::take(&mut *retired)
                .into_iter()
                .partition(|r| r.value <= completed_value);
            *retired = pending;
            done
        };
        let count = done.len();
        for retired in done {
            self.destroy(retired.object);
        }
        count
    }

    /// Destroy every retired object; the queue must be idle
    pub(crate) fn release_all_retired(&self) {
        self.collect_retired(u64::MAX);
    }

    fn destroy(&self, object: RetiredObject) {
        unsafe {
            match object {
                RetiredObject::Buffer(buffer, allocation) => {
                    self.device.destroy_buffer(buffer, None);
                    self.free(allocation);
                }
                RetiredObject::Image { image, view, allocation } => {
                    self.device.destroy_image_view(view, None);
                    self.device.destroy_image(image, None);
                    self.free(allocation);
                }
                RetiredObject::DescriptorSet(pool, set) => {
                    if let Err(e) = self.device.free_descriptor_sets(pool, &[set]) {
                        engine_warn!(SOURCE, "Failed to free descriptor set: {:?}", e);
                    }
                }
                RetiredObject::Pipeline(pipeline) => self.device.destroy_pipeline(pipeline, None),
            }
        }
    }

    // ------------------------------------------------------------------------
    // Uploads
    // ------------------------------------------------------------------------

    /// Record transfer commands, submit them and wait for completion
    pub(crate) fn submit_upload<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        unsafe {
            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.upload_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = self
                .device
                .allocate_command_buffers(&allocate_info)
                .map_err(|e| engine_err!(SOURCE, "Failed to allocate upload command buffer: {:?}", e))?[0];

            let result = self.run_upload(command_buffer, record);
            self.device.free_command_buffers(self.upload_pool, &[command_buffer]);
            result
        }
    }

    unsafe fn run_upload<F>(&self, command_buffer: vk::CommandBuffer, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.device
            .begin_command_buffer(command_buffer, &begin_info)
            .map_err(|e| engine_err!(SOURCE, "Failed to begin upload command buffer: {:?}", e))?;
        record(command_buffer);
        self.device
            .end_command_buffer(command_buffer)
            .map_err(|e| engine_err!(SOURCE, "Failed to end upload command buffer: {:?}", e))?;

        let fence = self
            .device
            .create_fence(&vk::FenceCreateInfo::default(), None)
            .map_err(|e| engine_err!(SOURCE, "Failed to create upload fence: {:?}", e))?;
        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        let result = self
            .device
            .queue_submit(self.queue, &[submit_info], fence)
            .and_then(|_| self.device.wait_for_fences(&[fence], true, u64::MAX))
            .map_err(|e| engine_err!(SOURCE, "Upload submission failed: {:?}", e));
        self.device.destroy_fence(fence, None);
        result
    }

    /// Block until the queue has no work left
    pub(crate) fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| engine_err!(SOURCE, "Failed to wait idle: {:?}", e))
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.release_all_retired();
            self.device.destroy_command_pool(self.upload_pool, None);

            // Allocator memory goes back before the device is destroyed
            ManuallyDrop::drop(&mut self.allocator);

            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        engine_info!(SOURCE, "Vulkan device '{}' destroyed", self.name);
    }
}
