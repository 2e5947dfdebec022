/// Physical device selection
///
/// The first enumerated device that qualifies wins; there is no ranking
/// between several qualifying devices. A device qualifies when it has a
/// queue family with both graphics and present support for the target
/// surface, exposes VK_KHR_swapchain, reports API 1.2 or newer and can bind
/// every descriptor set of the shared pipeline layout at once.

use fresh_render::fresh::{Error, Result};
use fresh_render::{engine_debug, engine_error, engine_info};

use crate::vulkan_util::{version_string, MIN_DEVICE_API_VERSION, PIPELINE_SET_COUNT, SOURCE};

/// What selection needs to know about the physical devices of an instance
pub trait PhysicalDeviceQuery {
    /// Device identifier (`vk::PhysicalDevice` on a real instance)
    type Device: Copy;

    fn devices(&self) -> Result<Vec<Self::Device>>;

    fn name(&self, device: Self::Device) -> String;

    /// Packed `VkPhysicalDeviceProperties::apiVersion`
    fn api_version(&self, device: Self::Device) -> u32;

    fn supports_swapchain(&self, device: Self::Device) -> bool;

    /// `VkPhysicalDeviceLimits::maxBoundDescriptorSets`
    fn max_bound_descriptor_sets(&self, device: Self::Device) -> u32;

    fn queue_family_count(&self, device: Self::Device) -> u32;

    fn supports_graphics(&self, device: Self::Device, family: u32) -> bool;

    /// Whether `family` can present to the target surface
    fn supports_present(&self, device: Self::Device, family: u32) -> bool;
}

/// Device chosen by [`select_physical_device`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDevice<D> {
    pub device: D,
    /// Queue family used for both graphics and present
    pub queue_family: u32,
    pub name: String,
}

/// Why a device was passed over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ApiTooOld(u32),
    NoSwapchain,
    TooFewDescriptorSets(u32),
    NoGraphicsPresentQueue,
}

/// Queue family of `device` with graphics and present, or why it has none
pub fn check_device<P: PhysicalDeviceQuery>(query: &P, device: P::Device) -> std::result::Result<u32, Rejection> {
    let api = query.api_version(device);
    if api < MIN_DEVICE_API_VERSION {
        return Err(Rejection::ApiTooOld(api));
    }
    if !query.supports_swapchain(device) {
        return Err(Rejection::NoSwapchain);
    }
    let sets = query.max_bound_descriptor_sets(device);
    if sets < PIPELINE_SET_COUNT {
        return Err(Rejection::TooFewDescriptorSets(sets));
    }
    (0..query.queue_family_count(device))
        .find(|&family| query.supports_graphics(device, family) && query.supports_present(device, family))
        .ok_or(Rejection::NoGraphicsPresentQueue)
}

/// First qualifying device in enumeration order
pub fn select_physical_device<P: PhysicalDeviceQuery>(query: &P) -> Result<SelectedDevice<P::Device>> {
    let devices = query.devices()?;
    if devices.is_empty() {
        engine_error!(SOURCE, "No Vulkan-capable GPU found");
        return Err(Error::InitializationFailed("no Vulkan physical device".to_string()));
    }

    for device in devices {
        let name = query.name(device);
        match check_device(query, device) {
            Ok(queue_family) => {
                engine_info!(
                    SOURCE,
                    "Selected GPU '{}' (Vulkan {}, queue family {})",
                    name,
                    version_string(query.api_version(device)),
                    queue_family
                );
                return Ok(SelectedDevice {
                    device,
                    queue_family,
                    name,
                });
            }
            Err(Rejection::ApiTooOld(api)) => {
                engine_debug!(SOURCE, "Skipping '{}': Vulkan {} is below 1.2", name, version_string(api));
            }
            Err(Rejection::NoSwapchain) => {
                engine_debug!(SOURCE, "Skipping '{}': no VK_KHR_swapchain", name);
            }
            Err(Rejection::TooFewDescriptorSets(sets)) => {
                engine_debug!(
                    SOURCE,
                    "Skipping '{}': binds {} descriptor sets, needs {}",
                    name,
                    sets,
                    PIPELINE_SET_COUNT
                );
            }
            Err(Rejection::NoGraphicsPresentQueue) => {
                engine_debug!(SOURCE, "Skipping '{}': no queue family with graphics and present", name);
            }
        }
    }

    engine_error!(SOURCE, "No GPU can render and present to this window");
    Err(Error::InitializationFailed(
        "no physical device with graphics+present, swapchain and Vulkan 1.2".to_string(),
    ))
}

#[cfg(test)]
#[path = "device_selection_tests.rs"]
mod tests;
