//! Unit tests for uniform_ring.rs

use crate::error::Error;
use crate::frame_ring::FRAMES_IN_FLIGHT;
use crate::uniform_ring::{align_up, UniformRing};

#[test]
fn test_align_up() {
    assert_eq!(align_up(64, 256), 256);
    assert_eq!(align_up(256, 256), 256);
    assert_eq!(align_up(257, 256), 512);
    assert_eq!(align_up(12, 0), 12);
    assert_eq!(align_up(12, 1), 12);
}

#[test]
fn test_slots_do_not_overlap() {
    let ring = UniformRing::new(80, 64, None);
    assert_eq!(ring.size(), 80);
    assert_eq!(ring.stride(), 128);
    assert_eq!(ring.allocation_size(), 128 * FRAMES_IN_FLIGHT);
    assert_eq!(ring.slot_offset(0), 0);
    assert_eq!(ring.slot_offset(1), 128);
    assert!(ring.slot_offset(1) >= ring.slot_offset(0) + ring.size());
}

#[test]
fn test_initial_contents_reach_every_slot_once() {
    let data = [7u8; 16];
    let mut ring = UniformRing::new(16, 16, Some(&data));
    for slot in 0..FRAMES_IN_FLIGHT {
        assert_eq!(ring.sync(slot), Some(&data[..]));
        assert_eq!(ring.sync(slot), None);
    }
}

#[test]
fn test_zeroed_without_initial_data() {
    let mut ring = UniformRing::new(8, 4, None);
    assert_eq!(ring.sync(0), Some(&[0u8; 8][..]));
}

#[test]
fn test_update_marks_in_flight_copy_stale_without_touching_it() {
    let mut ring = UniformRing::new(16, 16, None);
    ring.sync(0);
    ring.sync(1);

    // Frame on slot 0 submitted, CPU moves to slot 1 and writes new values
    ring.update(&[1, 2, 3, 4], 4).unwrap();
    let written = ring.sync(1).unwrap().to_vec();
    assert_eq!(&written[4..8], &[1, 2, 3, 4]);

    // Slot 0 is only rewritten when the ring comes back to it
    assert!(ring.is_stale(0));
    assert!(!ring.is_stale(1));
    assert_eq!(&ring.sync(0).unwrap()[4..8], &[1, 2, 3, 4]);
}

#[test]
fn test_partial_updates_accumulate() {
    let mut ring = UniformRing::new(8, 8, None);
    ring.update(&[1, 1], 0).unwrap();
    ring.update(&[2, 2], 6).unwrap();
    assert_eq!(ring.sync(1), Some(&[1u8, 1, 0, 0, 0, 0, 2, 2][..]));
}

#[test]
fn test_update_out_of_range_fails() {
    let mut ring = UniformRing::new(16, 16, None);
    ring.sync(0);
    assert!(matches!(ring.update(&[0; 8], 12), Err(Error::InvalidResource(_))));
    assert!(!ring.is_stale(0));
}
