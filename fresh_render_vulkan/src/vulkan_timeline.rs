/// TimelineSemaphore - Vulkan timeline semaphore as a GpuTimeline

use ash::vk;
use fresh_render::engine_err;
use fresh_render::fresh::pacing::GpuTimeline;
use fresh_render::fresh::Result;
use std::rc::Rc;

use crate::vulkan_device::VulkanDevice;
use crate::vulkan_util::SOURCE;

/// Timeline semaphore signaled on the device queue
pub struct TimelineSemaphore {
    device: Rc<VulkanDevice>,
    semaphore: vk::Semaphore,
}

impl TimelineSemaphore {
    pub(crate) fn new(device: Rc<VulkanDevice>) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { device.device.create_semaphore(&info, None) }
            .map_err(|e| engine_err!(SOURCE, "Failed to create timeline semaphore: {:?}", e))?;
        Ok(Self { device, semaphore })
    }
}

impl GpuTimeline for TimelineSemaphore {
    /// Empty submission ordered after all prior work on the queue
    fn signal(&mut self, value: u64) -> Result<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::default()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);
        unsafe {
            self.device
                .device
                .queue_submit(self.device.queue, &[submit_info], vk::Fence::null())
                .map_err(|e| engine_err!(SOURCE, "Timeline signal of value {} failed: {:?}", value, e))
        }
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.device.device.get_semaphore_counter_value(self.semaphore) }.unwrap_or(0)
    }

    fn wait_for(&mut self, value: u64) -> Result<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default().semaphores(&semaphores).values(&values);
        unsafe {
            self.device
                .device
                .wait_semaphores(&wait_info, u64::MAX)
                .map_err(|e| engine_err!(SOURCE, "Timeline wait for value {} failed: {:?}", value, e))
        }
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.device.device_wait_idle().ok();
            self.device.device.destroy_semaphore(self.semaphore, None);
        }
    }
}
