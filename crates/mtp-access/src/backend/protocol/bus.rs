//! Forcibly freeing MTP devices that another process holds.
//!
//! Desktop daemons (gvfs on Linux, `ptpcamerad` on macOS) grab MTP devices as soon as they are
//! plugged in, which makes the protocol library's session open fail. Eviction kills those
//! holders. It is destructive, so it only ever runs on explicit request.

use log::{debug, warn};
use std::process::Command;

use crate::error::AccessError;

/// A USB device in MTP mode, as listed by `lsusb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BusDevice {
    pub bus: String,
    pub device: String,
}

impl BusDevice {
    pub fn node_path(&self) -> String {
        format!("/dev/bus/usb/{}/{}", self.bus, self.device)
    }
}

/// Parses one `lsusb` line like `Bus 001 Device 005: ID 04e8:6860 Samsung Galaxy (MTP mode)`.
///
/// Only devices whose description ends with `(MTP mode)` (any case) are returned.
pub(crate) fn parse_lsusb_line(line: &str) -> Option<BusDevice> {
    let line = line.trim();
    if !line.to_uppercase().ends_with("(MTP MODE)") {
        return None;
    }

    let mut tokens = line.split_whitespace();
    if tokens.next()? != "Bus" {
        return None;
    }
    let bus = tokens.next()?;
    if tokens.next()? != "Device" {
        return None;
    }
    let device = tokens.next()?.trim_end_matches(':');

    let is_number = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !is_number(bus) || !is_number(device) {
        return None;
    }

    Some(BusDevice {
        bus: bus.to_string(),
        device: device.to_string(),
    })
}

/// Kills every process holding a USB device in MTP mode. Returns how many devices were freed.
#[cfg(target_os = "linux")]
pub(crate) fn evict_bus_users() -> Result<usize, AccessError> {
    let output = Command::new("lsusb")
        .output()
        .map_err(|e| AccessError::backend(format!("cannot run lsusb: {e}")))?;
    if !output.status.success() {
        return Err(AccessError::backend("lsusb failed"));
    }

    let listing = String::from_utf8_lossy(&output.stdout);
    let mut freed = 0;
    for device in listing.lines().filter_map(parse_lsusb_line) {
        let node = device.node_path();
        let output = Command::new("fuser")
            .args(["-k", &node])
            .output()
            .map_err(|e| AccessError::backend(format!("cannot run fuser: {e}")))?;

        if output.status.success() {
            warn!("Killed processes holding {} to free it for MTP access", node);
            freed += 1;
        } else if output.stdout.is_empty() {
            debug!("No process holds {}", node);
        } else {
            return Err(AccessError::backend(format!(
                "cannot kill processes holding {}: {}",
                node,
                String::from_utf8_lossy(&output.stdout).trim()
            )));
        }
    }
    Ok(freed)
}

/// Kills `ptpcamerad`, the macOS daemon that claims MTP devices. Returns 1 if it was running.
#[cfg(target_os = "macos")]
pub(crate) fn evict_bus_users() -> Result<usize, AccessError> {
    let status = Command::new("pkill")
        .args(["-9", "ptpcamerad"])
        .status()
        .map_err(|e| AccessError::backend(format!("cannot run pkill: {e}")))?;

    // pkill exits with 1 when nothing matched.
    match status.code() {
        Some(0) => {
            warn!("Killed ptpcamerad to free MTP devices");
            Ok(1)
        }
        Some(1) => {
            debug!("ptpcamerad not running");
            Ok(0)
        }
        _ => Err(AccessError::backend(format!("pkill ptpcamerad failed: {status}"))),
    }
}
