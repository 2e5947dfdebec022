/// FenceTimeline - ID3D12Fence plus an OS event as a GpuTimeline

use fresh_render::{engine_err, engine_error};
use fresh_render::fresh::pacing::GpuTimeline;
use fresh_render::fresh::Result;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};

use crate::d3d12_util::{fence_wait_status, SOURCE};

/// Fence signaled by one command queue
pub struct FenceTimeline {
    queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    event: HANDLE,
}

impl FenceTimeline {
    pub(crate) fn new(device: &ID3D12Device, queue: &ID3D12CommandQueue) -> Result<Self> {
        unsafe {
            let fence: ID3D12Fence = device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| engine_err!(SOURCE, "CreateFence failed: {}", e))?;
            let event = CreateEventW(None, false, false, None)
                .map_err(|e| engine_err!(SOURCE, "CreateEventW failed: {}", e))?;
            Ok(Self {
                queue: queue.clone(),
                fence,
                event,
            })
        }
    }
}

impl GpuTimeline for FenceTimeline {
    fn signal(&mut self, value: u64) -> Result<()> {
        unsafe {
            self.queue
                .Signal(&self.fence, value)
                .map_err(|e| engine_err!(SOURCE, "Queue signal of fence value {} failed: {}", value, e))
        }
    }

    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    /// Fails when the event wait fails or returns with the fence short of `value`
    fn wait_for(&mut self, value: u64) -> Result<()> {
        if self.completed_value() >= value {
            return Ok(());
        }
        unsafe {
            self.fence
                .SetEventOnCompletion(value, self.event)
                .map_err(|e| engine_err!(SOURCE, "SetEventOnCompletion({}) failed: {}", value, e))?;
            let status = WaitForSingleObject(self.event, INFINITE);
            if status == WAIT_FAILED {
                engine_error!(SOURCE, "WaitForSingleObject: {}", windows::core::Error::from_win32());
            }
            fence_wait_status(status.0, self.completed_value(), value)
        }
    }
}

impl Drop for FenceTimeline {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}
