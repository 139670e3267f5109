//! Shared fixtures for the scenario tests.

use crate::backend::virtual_device::VirtualDevice;
use crate::context::BackendContext;
use crate::device::Device;

/// Routes `log` output through `env_logger` (honors `RUST_LOG`). Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The `Phone_ModelX_SN123` device with an `Internal` storage holding a 10-byte `a.txt`.
pub fn phone() -> VirtualDevice {
    VirtualDevice::new("Phone", "ModelX", "SN123").with_file("Internal/a.txt", b"0123456789".to_vec())
}

/// Enumerates a context over `devices` and returns it with the single device it found.
pub fn open_single(device: VirtualDevice) -> (BackendContext, Device) {
    init_logging();
    let mut context = BackendContext::virtual_devices(vec![device]);
    let mut devices = context.enumerate().unwrap();
    assert_eq!(devices.len(), 1);
    let device = devices.remove(0);
    (context, device)
}

/// Adds a full tree of `depth` levels below `root`, `branching` children per node.
///
/// Levels above the last are directories, the last level is files, so the tree has
/// `branching + branching^2 + ... + branching^depth` descendants in total.
pub fn with_tree(mut device: VirtualDevice, root: &str, depth: u32, branching: u32) -> VirtualDevice {
    let mut level = vec![root.to_string()];
    for current in 1..=depth {
        let mut next = Vec::new();
        for dir in &level {
            for i in 0..branching {
                if current == depth {
                    device = device.with_file(&format!("{dir}/f{i}.bin"), vec![0u8; (i + 1) as usize]);
                } else {
                    let child = format!("{dir}/d{i}");
                    device = device.with_directory(&child);
                    next.push(child);
                }
            }
        }
        level = next;
    }
    device
}
