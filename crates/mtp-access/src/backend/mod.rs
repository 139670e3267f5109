//! The capability interface every backend implements.
//!
//! A [`Backend`] lives for the whole [`crate::BackendContext`] and owns process-level setup
//! (COM initialization, the async runtime, probing the mount root). Each discovered device is a
//! [`DeviceSession`], which answers listing and mutation calls keyed by an opaque [`ObjectId`].
//! The tree layer in [`crate::content`] builds names, full paths, and kinds on top of these raw
//! calls, so backends never deal with logical paths beyond a single path segment.
//!
//! # Variants
//!
//! - `com`: Windows Portable Devices over COM (Windows only)
//! - `mount`: directories under a gvfs-style mount root
//! - `protocol`: the mtp-rs protocol library over USB (Linux and macOS)
//! - `virtual_device`: in-memory devices for tests and demos

#[cfg(any(windows, test))]
pub(crate) mod batched;
#[cfg(windows)]
pub(crate) mod com;
pub(crate) mod mount;
#[cfg(any(target_os = "macos", target_os = "linux"))]
pub(crate) mod protocol;
#[cfg(any(test, feature = "virtual-device"))]
pub mod virtual_device;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::content::ContentKind;
use crate::device::DeviceIdentity;
use crate::error::AccessError;
use crate::transfer::ProgressFn;

/// Which backend variant a context or device runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Com,
    Mount,
    Protocol,
    Virtual,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Com => "COM/WPD",
            Self::Mount => "mount",
            Self::Protocol => "protocol",
            Self::Virtual => "virtual",
        };
        f.write_str(name)
    }
}

/// Storage capacity as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl SpaceInfo {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }
}

/// Backend-specific handle of one object on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ObjectId {
    /// WPD object ID string.
    #[cfg_attr(not(windows), allow(dead_code))]
    Object(String),
    /// Path relative to the device's root (mount and virtual backends).
    Path(PathBuf),
    /// Storage ID plus object handle (protocol backend). The storage root uses handle `0`.
    #[cfg_attr(not(any(target_os = "macos", target_os = "linux")), allow(dead_code))]
    Handle { storage: u32, handle: u32 },
}

/// One listing result before the tree layer turns it into a node.
#[derive(Debug, Clone)]
pub(crate) struct RawEntry {
    pub name: String,
    pub kind: ContentKind,
    /// Byte size; only meaningful for files.
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    pub id: ObjectId,
}

/// Lazy listing. A failure is yielded as the last item.
pub(crate) type EntryStream = Box<dyn Iterator<Item = Result<RawEntry, AccessError>>>;

/// Operations on one open device.
pub(crate) trait DeviceSession: Send + Sync {
    fn identity(&self) -> &DeviceIdentity;

    /// Handle of the device root, the parent of all storages.
    fn root_id(&self) -> ObjectId;

    fn list_storages(&self) -> Result<Vec<RawEntry>, AccessError>;

    /// Children of a storage or directory. Errors returned here mean the listing could not start.
    fn list_children(&self, parent: &ObjectId) -> Result<EntryStream, AccessError>;

    fn create_directory(&self, parent: &ObjectId, name: &str) -> Result<(), AccessError>;

    /// Writes `size` bytes from `source` into a new file `name` under `parent`.
    fn upload(
        &self,
        parent: &ObjectId,
        name: &str,
        source: &mut dyn Read,
        size: u64,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, AccessError>;

    /// Streams the object's bytes into `sink`. `size` is the expected total, for progress only.
    fn download(
        &self,
        object: &ObjectId,
        size: u64,
        sink: &mut dyn Write,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, AccessError>;

    /// Removes the object and everything below it. An absent object is not an error.
    fn remove(&self, object: &ObjectId) -> Result<(), AccessError>;

    fn space_info(&self, _storage: &ObjectId) -> Result<Option<SpaceInfo>, AccessError> {
        Ok(None)
    }

    /// Releases the device. Called at most once.
    fn close(&self) -> Result<(), AccessError>;
}

/// Process-level half of a backend.
pub(crate) trait Backend: Send {
    fn kind(&self) -> BackendKind;

    fn initialize(&mut self) -> Result<(), AccessError>;

    /// Opens every attached device. Devices that cannot be opened are skipped.
    fn discover(&mut self) -> Result<Vec<Box<dyn DeviceSession>>, AccessError>;

    fn shutdown(&mut self) -> Result<(), AccessError>;

    /// Kills other processes holding MTP devices. Returns how many devices were freed.
    fn evict_bus_users(&mut self) -> Result<usize, AccessError> {
        Err(AccessError::backend(format!(
            "evicting bus users is not supported by the {} backend",
            self.kind()
        )))
    }
}

/// A session plus the closed flag every node of the device checks before calling into it.
pub(crate) struct SessionHandle {
    session: Box<dyn DeviceSession>,
    root_id: ObjectId,
    closed: AtomicBool,
}

impl SessionHandle {
    pub fn new(session: Box<dyn DeviceSession>) -> Self {
        Self {
            root_id: session.root_id(),
            session,
            closed: AtomicBool::new(false),
        }
    }

    pub fn root_id(&self) -> &ObjectId {
        &self.root_id
    }

    pub fn identity(&self) -> &DeviceIdentity {
        self.session.identity()
    }

    /// The live session, or a failure once the device has been closed.
    pub fn session(&self) -> Result<&dyn DeviceSession, AccessError> {
        if self.is_closed() {
            return Err(AccessError::backend(format!(
                "device {} is closed",
                self.identity().composite_name
            )));
        }
        Ok(self.session.as_ref())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the session once. Returns `false` if it was already closed.
    pub fn close(&self) -> Result<bool, AccessError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Device {} already closed", self.identity().composite_name);
            return Ok(false);
        }
        self.session.close()?;
        Ok(true)
    }
}
