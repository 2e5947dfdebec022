//! Ring of frame slots

/// Frames in flight on the double-buffered backends
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Index into a ring of `len` frame slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRing {
    index: usize,
    len: usize,
}

impl FrameRing {
    /// A ring of `len` slots (at least one)
    pub fn new(len: usize) -> Self {
        Self {
            index: 0,
            len: len.max(1),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Move to the next slot and return it
    pub fn advance(&mut self) -> usize {
        self.index = (self.index + 1) % self.len;
        self.index
    }

    /// Index following the current one, without moving
    pub fn next_index(&self) -> usize {
        (self.index + 1) % self.len
    }
}
