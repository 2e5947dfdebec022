//! Unit tests for device_selection.rs, driven by a scripted device query

use crate::device_selection::*;
use ash::vk;
use fresh_render::fresh::{Error, Result};

#[derive(Clone)]
struct FakeFamily {
    graphics: bool,
    present: bool,
}

#[derive(Clone)]
struct FakeDevice {
    name: &'static str,
    api: u32,
    swapchain: bool,
    descriptor_sets: u32,
    families: Vec<FakeFamily>,
}

impl FakeDevice {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            api: vk::API_VERSION_1_3,
            swapchain: true,
            descriptor_sets: 8,
            families: vec![FakeFamily {
                graphics: true,
                present: true,
            }],
        }
    }

    fn without_present(mut self) -> Self {
        for family in &mut self.families {
            family.present = false;
        }
        self
    }
}

struct FakeQuery {
    devices: Vec<FakeDevice>,
}

impl PhysicalDeviceQuery for FakeQuery {
    type Device = usize;

    fn devices(&self) -> Result<Vec<usize>> {
        Ok((0..self.devices.len()).collect())
    }

    fn name(&self, device: usize) -> String {
        self.devices[device].name.to_string()
    }

    fn api_version(&self, device: usize) -> u32 {
        self.devices[device].api
    }

    fn supports_swapchain(&self, device: usize) -> bool {
        self.devices[device].swapchain
    }

    fn max_bound_descriptor_sets(&self, device: usize) -> u32 {
        self.devices[device].descriptor_sets
    }

    fn queue_family_count(&self, device: usize) -> u32 {
        self.devices[device].families.len() as u32
    }

    fn supports_graphics(&self, device: usize, family: u32) -> bool {
        self.devices[device].families[family as usize].graphics
    }

    fn supports_present(&self, device: usize, family: u32) -> bool {
        self.devices[device].families[family as usize].present
    }
}

// ============================================================================
// SELECTION
// ============================================================================

#[test]
fn test_selects_the_presenting_device() {
    let query = FakeQuery {
        devices: vec![FakeDevice::new("offscreen").without_present(), FakeDevice::new("display")],
    };
    let selected = select_physical_device(&query).unwrap();
    assert_eq!(selected.device, 1);
    assert_eq!(selected.name, "display");
    assert_eq!(selected.queue_family, 0);
}

#[test]
fn test_first_qualifying_device_wins() {
    let query = FakeQuery {
        devices: vec![FakeDevice::new("integrated"), FakeDevice::new("discrete")],
    };
    assert_eq!(select_physical_device(&query).unwrap().name, "integrated");
}

#[test]
fn test_no_devices_fails() {
    let query = FakeQuery { devices: Vec::new() };
    assert!(matches!(select_physical_device(&query), Err(Error::InitializationFailed(_))));
}

#[test]
fn test_no_qualifying_device_fails() {
    let mut old = FakeDevice::new("old");
    old.api = vk::API_VERSION_1_1;
    let query = FakeQuery {
        devices: vec![old, FakeDevice::new("headless").without_present()],
    };
    assert!(matches!(select_physical_device(&query), Err(Error::InitializationFailed(_))));
}

// ============================================================================
// QUALIFICATION
// ============================================================================

#[test]
fn test_graphics_and_present_must_share_a_family() {
    let mut split = FakeDevice::new("split");
    split.families = vec![
        FakeFamily {
            graphics: true,
            present: false,
        },
        FakeFamily {
            graphics: false,
            present: true,
        },
    ];
    let query = FakeQuery { devices: vec![split] };
    assert_eq!(check_device(&query, 0), Err(Rejection::NoGraphicsPresentQueue));
}

#[test]
fn test_picks_first_family_with_both() {
    let mut device = FakeDevice::new("multi");
    device.families = vec![
        FakeFamily {
            graphics: false,
            present: true,
        },
        FakeFamily {
            graphics: true,
            present: true,
        },
    ];
    let query = FakeQuery { devices: vec![device] };
    assert_eq!(check_device(&query, 0), Ok(1));
}

#[test]
fn test_swapchain_extension_required() {
    let mut device = FakeDevice::new("compute");
    device.swapchain = false;
    let query = FakeQuery { devices: vec![device] };
    assert_eq!(check_device(&query, 0), Err(Rejection::NoSwapchain));
}

#[test]
fn test_api_1_2_required() {
    let mut device = FakeDevice::new("legacy");
    device.api = vk::API_VERSION_1_1;
    let query = FakeQuery { devices: vec![device] };
    assert_eq!(check_device(&query, 0), Err(Rejection::ApiTooOld(vk::API_VERSION_1_1)));

    let mut device = FakeDevice::new("minimum");
    device.api = vk::API_VERSION_1_2;
    let query = FakeQuery { devices: vec![device] };
    assert_eq!(check_device(&query, 0), Ok(0));
}

#[test]
fn test_uniform_and_texture_sets_must_fit() {
    let mut device = FakeDevice::new("four-sets");
    device.descriptor_sets = 4;
    let query = FakeQuery {
        devices: vec![device, FakeDevice::new("eight-sets")],
    };
    assert_eq!(check_device(&query, 0), Err(Rejection::TooFewDescriptorSets(4)));
    assert_eq!(select_physical_device(&query).unwrap().name, "eight-sets");
}
