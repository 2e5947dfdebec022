//! Per-frame copies of a persistently mapped uniform buffer
//!
//! On the double-buffered backends the GPU may still read the previous
//! frame's copy of a uniform buffer while the CPU records the next one.
//! A `UniformRing` lays out one aligned copy per frame slot in a single
//! allocation and keeps a CPU shadow of the contents. Writes only ever go
//! to the copy of the current slot, which the frame advance has already
//! waited for.

use crate::error::Result;
use crate::frame_ring::FRAMES_IN_FLIGHT;
use crate::resource::validate_buffer_update;

/// Aligned per-slot layout and staleness of one uniform buffer
#[derive(Debug, Clone)]
pub struct UniformRing {
    stride: usize,
    shadow: Vec<u8>,
    version: u64,
    slot_versions: [u64; FRAMES_IN_FLIGHT],
}

/// `value` rounded up to a multiple of `alignment` (a power of two, or 0/1)
pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

impl UniformRing {
    /// Ring for a buffer of `size` bytes whose copies start on `alignment`
    ///
    /// Every slot starts stale, so the first sync of each slot writes the
    /// initial contents (zeroes without `initial`).
    pub fn new(size: usize, alignment: usize, initial: Option<&[u8]>) -> Self {
        let mut shadow = vec![0u8; size];
        if let Some(data) = initial.and_then(|d| d.get(..size)) {
            shadow.copy_from_slice(data);
        }
        Self {
            stride: align_up(size, alignment),
            shadow,
            version: 1,
            slot_versions: [0; FRAMES_IN_FLIGHT],
        }
    }

    /// Bytes the shader sees
    pub fn size(&self) -> usize {
        self.shadow.len()
    }

    /// Distance between two slot copies
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes to allocate for all copies
    pub fn allocation_size(&self) -> usize {
        self.stride * FRAMES_IN_FLIGHT
    }

    pub fn slot_offset(&self, slot: usize) -> usize {
        (slot % FRAMES_IN_FLIGHT) * self.stride
    }

    /// Record `data` at `offset` in the shadow; every slot becomes stale
    pub fn update(&mut self, data: &[u8], offset: usize) -> Result<()> {
        validate_buffer_update(self.shadow.len(), data.len(), offset)?;
        self.shadow[offset..offset + data.len()].copy_from_slice(data);
        self.version += 1;
        Ok(())
    }

    pub fn is_stale(&self, slot: usize) -> bool {
        self.slot_versions[slot % FRAMES_IN_FLIGHT] != self.version
    }

    /// Contents to write at `slot_offset(slot)`, or None if that copy is current
    pub fn sync(&mut self, slot: usize) -> Option<&[u8]> {
        if !self.is_stale(slot) {
            return None;
        }
        self.slot_versions[slot % FRAMES_IN_FLIGHT] = self.version;
        Some(&self.shadow)
    }
}

#[cfg(test)]
#[path = "uniform_ring_tests.rs"]
mod tests;
