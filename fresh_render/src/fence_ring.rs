//! Per-slot fence values for the explicitly synchronized backends
//!
//! Direct3D 12 drives this with an `ID3D12Fence` plus an OS event, Vulkan
//! with a timeline semaphore. Both are expressed as a [`GpuTimeline`]: a
//! monotonically increasing 64-bit counter the queue signals and the CPU
//! can wait on.
//!
//! Each slot remembers the value that marks its last submission complete.
//! A slot is only handed back to the CPU once the timeline has reached that
//! value.

use crate::error::Result;

/// GPU timeline the CPU can signal through the queue and wait on
pub trait GpuTimeline {
    /// Enqueue a signal of `value` after all work submitted so far
    fn signal(&mut self, value: u64) -> Result<()>;

    /// Last value the GPU has reached
    fn completed_value(&self) -> u64;

    /// Block until the GPU reaches `value`
    ///
    /// No timeout: a wait that never returns is a lost device.
    fn wait_for(&mut self, value: u64) -> Result<()>;
}

/// Ring of `N` frame slots, each with its own fence value
#[derive(Debug, Clone)]
pub struct FenceRing<const N: usize> {
    values: [u64; N],
    index: usize,
}

impl<const N: usize> FenceRing<N> {
    /// Slot 0 starts at 1 so the first signal is distinguishable from the
    /// fence's initial value of 0
    pub fn new() -> Self {
        let mut values = [0; N];
        values[0] = 1;
        Self { values, index: 0 }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        N
    }

    /// Fence value the current slot's submission will signal
    pub fn current_value(&self) -> u64 {
        self.values[self.index]
    }

    pub fn slot_value(&self, slot: usize) -> u64 {
        self.values[slot]
    }

    /// Move to the next frame after submitting the current one
    ///
    /// Signals the current slot's value, advances the index, blocks until
    /// the new slot's previous submission has completed, then gives the new
    /// slot the value following the one just signaled.
    pub fn advance<T: GpuTimeline + ?Sized>(&mut self, timeline: &mut T) -> Result<usize> {
        let submitted = self.values[self.index];
        timeline.signal(submitted)?;

        self.index = (self.index + 1) % N;

        let pending = self.values[self.index];
        if timeline.completed_value() < pending {
            timeline.wait_for(pending)?;
        }

        self.values[self.index] = submitted + 1;
        Ok(self.index)
    }

    /// Drain the queue: signal the current value and wait for it
    pub fn wait_idle<T: GpuTimeline + ?Sized>(&mut self, timeline: &mut T) -> Result<()> {
        let value = self.values[self.index];
        timeline.signal(value)?;
        timeline.wait_for(value)?;
        self.values[self.index] = value + 1;
        Ok(())
    }

    /// Re-seed every slot after the swapchain was rebuilt
    ///
    /// Must follow [`FenceRing::wait_idle`]. `index` is the slot the
    /// rebuilt swapchain starts on.
    pub fn reset_after_resize(&mut self, index: usize) {
        let value = self.values[self.index];
        self.values = [value; N];
        self.index = index % N;
    }
}

impl<const N: usize> Default for FenceRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "fence_ring_tests.rs"]
mod tests;
