//! Turning discovered sessions into ready [`Device`] handles.

use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use crate::backend::{Backend, SessionHandle};
use crate::device::Device;
use crate::error::AccessError;

/// Discovers devices and keeps only the ready ones.
///
/// A device is ready once it reports at least one storage. Devices still negotiating with the
/// host report none (or fail to list them); those are closed again and left out silently.
/// Only a failing discovery call is an error.
pub(crate) fn enumerate_devices(
    backend: &mut dyn Backend,
    open_devices: &Arc<AtomicUsize>,
) -> Result<Vec<Device>, AccessError> {
    let kind = backend.kind();
    let sessions = backend.discover().map_err(|e| e.context("enumerate devices"))?;
    let discovered = sessions.len();

    let mut devices = Vec::with_capacity(discovered);
    for session in sessions {
        let handle = SessionHandle::new(session);
        let composite = handle.identity().composite_name.clone();

        let ready = match handle.session().and_then(|s| s.list_storages()) {
            Ok(storages) if !storages.is_empty() => true,
            Ok(_) => {
                debug!("Device {} has no storages yet, skipping", composite);
                false
            }
            Err(e) => {
                warn!("Device {} is not ready: {}", composite, e);
                false
            }
        };

        if ready {
            devices.push(Device::new(handle, kind, Arc::clone(open_devices)));
        } else if let Err(e) = handle.close() {
            warn!("Failed to release skipped device {}: {}", composite, e);
        }
    }

    info!(
        "Enumerated {} ready device(s) of {} discovered ({} backend)",
        devices.len(),
        discovered,
        kind
    );
    Ok(devices)
}
