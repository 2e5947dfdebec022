//! Unit tests for fence_ring.rs
//!
//! A simulated GPU queue stands in for the D3D12 fence / Vulkan timeline:
//! signals enter a pending queue and only complete when the CPU waits or the
//! test lets the GPU run.

use crate::error::{Error, Result};
use crate::fence_ring::{FenceRing, GpuTimeline};
use std::collections::VecDeque;

#[derive(Default)]
struct SimulatedQueue {
    pending: VecDeque<u64>,
    completed: u64,
    signals: Vec<u64>,
    waits: Vec<u64>,
}

impl SimulatedQueue {
    /// Let the GPU finish every pending submission
    fn run_to_idle(&mut self) {
        while let Some(value) = self.pending.pop_front() {
            self.completed = self.completed.max(value);
        }
    }
}

impl GpuTimeline for SimulatedQueue {
    fn signal(&mut self, value: u64) -> Result<()> {
        self.signals.push(value);
        self.pending.push_back(value);
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        self.completed
    }

    fn wait_for(&mut self, value: u64) -> Result<()> {
        self.waits.push(value);
        while self.completed < value {
            match self.pending.pop_front() {
                Some(v) => self.completed = self.completed.max(v),
                // Nothing left that could ever reach the value: a lost device
                None => return Err(Error::BackendError(format!("wait for {} never completes", value))),
            }
        }
        Ok(())
    }
}

// ============================================================================
// ADVANCE
// ============================================================================

#[test]
fn test_first_signal_is_one() {
    let mut ring = FenceRing::<2>::new();
    let mut queue = SimulatedQueue::default();
    ring.advance(&mut queue).unwrap();
    assert_eq!(queue.signals, vec![1]);
}

#[test]
fn test_index_wraps_after_ring_size_cycles() {
    let mut ring = FenceRing::<2>::new();
    let mut queue = SimulatedQueue::default();
    for _ in 0..2 {
        ring.advance(&mut queue).unwrap();
    }
    assert_eq!(ring.index(), 0);
    for _ in 0..6 {
        ring.advance(&mut queue).unwrap();
    }
    assert_eq!(ring.index() % ring.len(), 0);
}

#[test]
fn test_new_slot_value_is_last_submitted_plus_one() {
    let mut ring = FenceRing::<2>::new();
    let mut queue = SimulatedQueue::default();
    for _ in 0..10 {
        let submitted = ring.current_value();
        ring.advance(&mut queue).unwrap();
        assert_eq!(ring.current_value(), submitted + 1);
    }
}

#[test]
fn test_signaled_values_strictly_increase() {
    let mut ring = FenceRing::<2>::new();
    let mut queue = SimulatedQueue::default();
    for _ in 0..16 {
        ring.advance(&mut queue).unwrap();
    }
    assert!(queue.signals.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_slot_never_reused_before_its_fence_is_signaled() {
    let mut ring = FenceRing::<2>::new();
    let mut queue = SimulatedQueue::default();
    // Value each slot's last submission signaled
    let mut last_signal_for_slot = [None::<u64>; 2];

    for _ in 0..32 {
        let slot = ring.index();
        last_signal_for_slot[slot] = Some(ring.current_value());

        let next = ring.advance(&mut queue).unwrap();

        if let Some(required) = last_signal_for_slot[next] {
            assert!(
                queue.completed_value() >= required,
                "slot {} handed out at completed={} before its fence {} was signaled",
                next,
                queue.completed_value(),
                required
            );
        }
    }
}

#[test]
fn test_no_wait_when_gpu_already_caught_up() {
    let mut ring = FenceRing::<2>::new();
    let mut queue = SimulatedQueue::default();
    for _ in 0..8 {
        ring.advance(&mut queue).unwrap();
        queue.run_to_idle();
    }
    assert!(queue.waits.is_empty());
}

#[test]
fn test_wait_happens_when_gpu_lags() {
    let mut ring = FenceRing::<2>::new();
    let mut queue = SimulatedQueue::default();
    // Slot 1 starts at 0 and needs no wait; returning to slot 0 does
    ring.advance(&mut queue).unwrap();
    assert!(queue.waits.is_empty());
    ring.advance(&mut queue).unwrap();
    assert_eq!(queue.waits, vec![1]);
}

#[test]
fn test_three_slot_ring() {
    let mut ring = FenceRing::<3>::new();
    let mut queue = SimulatedQueue::default();
    for _ in 0..3 {
        ring.advance(&mut queue).unwrap();
    }
    assert_eq!(ring.index(), 0);
    assert_eq!(queue.signals, vec![1, 2, 3]);
}

// ============================================================================
// WAIT IDLE & RESIZE
// ============================================================================

#[test]
fn test_wait_idle_drains_everything() {
    let mut ring = FenceRing::<2>::new();
    let mut queue = SimulatedQueue::default();
    for _ in 0..3 {
        ring.advance(&mut queue).unwrap();
    }
    let value = ring.current_value();
    ring.wait_idle(&mut queue).unwrap();
    assert_eq!(queue.completed_value(), value);
    assert!(queue.pending.is_empty());
    assert_eq!(ring.current_value(), value + 1);
}

#[test]
fn test_reset_after_resize_seeds_all_slots() {
    let mut ring = FenceRing::<2>::new();
    let mut queue = SimulatedQueue::default();
    for _ in 0..5 {
        ring.advance(&mut queue).unwrap();
    }
    ring.wait_idle(&mut queue).unwrap();
    let value = ring.current_value();
    ring.reset_after_resize(0);
    assert_eq!(ring.index(), 0);
    assert_eq!(ring.slot_value(0), value);
    assert_eq!(ring.slot_value(1), value);

    // Frames keep flowing with monotonic signals after the reset
    let before = queue.signals.len();
    for _ in 0..4 {
        ring.advance(&mut queue).unwrap();
    }
    let after = &queue.signals[before - 1..];
    assert!(after.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_signal_failure_propagates_without_advancing() {
    struct FailingQueue;
    impl GpuTimeline for FailingQueue {
        fn signal(&mut self, _value: u64) -> Result<()> {
            Err(Error::BackendError("device removed".into()))
        }
        fn completed_value(&self) -> u64 {
            0
        }
        fn wait_for(&mut self, _value: u64) -> Result<()> {
            Ok(())
        }
    }

    let mut ring = FenceRing::<2>::new();
    assert!(ring.advance(&mut FailingQueue).is_err());
    assert_eq!(ring.index(), 0);
    assert_eq!(ring.current_value(), 1);
}
