//! An opened device and its identity.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::{BackendKind, SessionHandle};
use crate::content::ContentNode;
use crate::error::AccessError;

/// Who a device is. `composite_name` is the root segment of every logical path on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub name: String,
    pub description: String,
    pub serial_number: String,
    pub composite_name: String,
}

impl DeviceIdentity {
    /// Builds an identity whose composite name is `"{name}_{description}_{serial}"`.
    pub fn new(name: impl Into<String>, description: impl Into<String>, serial_number: impl Into<String>) -> Self {
        let name = name.into();
        let description = description.into();
        let serial_number = serial_number.into();
        let composite_name = format!("{name}_{description}_{serial_number}");
        Self {
            name,
            description,
            serial_number,
            composite_name,
        }
    }
}

/// An open device, exclusively owned by the caller.
///
/// Closing is explicit via [`Device::close`] and idempotent; dropping an unclosed device closes
/// it. Nodes obtained from a closed device fail every operation.
pub struct Device {
    handle: Arc<SessionHandle>,
    backend: BackendKind,
    open_devices: Arc<AtomicUsize>,
    open: bool,
}

impl Device {
    pub(crate) fn new(handle: SessionHandle, backend: BackendKind, open_devices: Arc<AtomicUsize>) -> Self {
        open_devices.fetch_add(1, Ordering::AcqRel);
        Self {
            handle: Arc::new(handle),
            backend,
            open_devices,
            open: true,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        self.handle.identity()
    }

    pub fn name(&self) -> &str {
        &self.identity().name
    }

    pub fn description(&self) -> &str {
        &self.identity().description
    }

    pub fn serial_number(&self) -> &str {
        &self.identity().serial_number
    }

    pub fn composite_name(&self) -> &str {
        &self.identity().composite_name
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn is_closed(&self) -> bool {
        !self.open
    }

    /// The device root node. Its children are the storages.
    pub fn root(&self) -> ContentNode {
        ContentNode::device_root(Arc::clone(&self.handle))
    }

    /// Top-level storages, sorted by name.
    pub fn get_content(&self) -> Result<Vec<ContentNode>, AccessError> {
        self.root().get_children()?.collect()
    }

    /// Resolves a path that either starts with the composite name or with a storage name.
    pub fn get_path(&self, path: &str) -> Result<Option<ContentNode>, AccessError> {
        self.root().get_path(path)
    }

    pub fn exists(&self, path: &str) -> Result<bool, AccessError> {
        Ok(self.get_path(path)?.is_some())
    }

    /// Releases the device. Later calls are no-ops.
    pub fn close(&mut self) -> Result<(), AccessError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.open_devices.fetch_sub(1, Ordering::AcqRel);

        if self.handle.close()? {
            info!("Closed device {} ({})", self.composite_name(), self.backend);
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close device {}: {}", self.composite_name(), e);
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.serial_number(), self.name())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("identity", self.identity())
            .field("backend", &self.backend)
            .field("open", &self.open)
            .finish()
    }
}

/// Resolves `path` on `device`; the free-function form of [`Device::get_path`].
pub fn get_content_from_device_path(device: &Device, path: &str) -> Result<Option<ContentNode>, AccessError> {
    device.get_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_name() {
        let identity = DeviceIdentity::new("Phone", "ModelX", "SN123");
        assert_eq!(identity.composite_name, "Phone_ModelX_SN123");
    }

    #[test]
    fn test_identity_serialization() {
        let identity = DeviceIdentity::new("Pixel", "Pixel 8", "3A1");
        let json = serde_json::to_string(&identity).unwrap();
        assert!(json.contains("\"serialNumber\":\"3A1\""));
        assert!(json.contains("\"compositeName\":\"Pixel_Pixel 8_3A1\""));
    }
}
