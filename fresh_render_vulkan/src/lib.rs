/*!
# Fresh Render - Vulkan Backend

Vulkan implementation of the Fresh render context, built on `ash` with
`gpu-allocator` for device memory. Frames are double-buffered and paced by a
timeline semaphore: each slot has its own command buffer and timeline value,
and the CPU never resets a command buffer before the GPU has reached the
value of its last submission.

Shaders are SPIR-V. [`ShaderManager`] loads them from disk and reports files
changed since, for hot reload. Validation layers and the debug messenger are
only compiled in with the `vulkan-validation` feature.
*/

mod device_selection;
mod shader_manager;
mod vulkan_buffer;
mod vulkan_context;
mod vulkan_device;
mod vulkan_pipeline;
mod vulkan_shader;
mod vulkan_swapchain;
mod vulkan_texture;
mod vulkan_timeline;
mod vulkan_util;

#[cfg(feature = "vulkan-validation")]
mod debug;

pub use device_selection::{check_device, select_physical_device, PhysicalDeviceQuery, Rejection, SelectedDevice};
pub use shader_manager::ShaderManager;
pub use vulkan_context::VulkanRenderContext;
pub use vulkan_shader::{merge_push_constants, reflect_push_constants};
pub use vulkan_util::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, spirv_source, spirv_words,
    version_string, DEPTH_FORMAT, MIN_DEVICE_API_VERSION, PIPELINE_SET_COUNT, PREFERRED_SURFACE_FORMATS,
    PUSH_CONSTANT_SIZE, SPIRV_MAGIC, TEXTURE_DESCRIPTOR_CAPACITY, TEXTURE_SET_BASE, UNIFORM_BUFFER_SET,
    UNIFORM_DESCRIPTOR_CAPACITY,
};

#[cfg(feature = "vulkan-validation")]
pub use debug::{get_validation_stats, print_validation_stats_report, ValidationStats};

/// Register the Vulkan backend with the render context factory
///
/// # Example
///
/// ```no_run
/// use fresh_render::fresh::{GraphicsApi, RenderConfig, RenderContextFactory};
///
/// fresh_render_vulkan::register();
/// let context = RenderContextFactory::create(GraphicsApi::Vulkan, &RenderConfig::default());
/// ```
pub fn register() {
    use fresh_render::fresh::{register_backend, GraphicsApi, RenderContext};

    register_backend(GraphicsApi::Vulkan, |config| {
        Ok(Box::new(VulkanRenderContext::new(config.clone())) as Box<dyn RenderContext>)
    });
}
