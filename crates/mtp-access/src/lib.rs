//! Uniform, path-addressable access to MTP devices (phones, tablets, cameras).
//!
//! The same tree of storages, directories and files is exposed over three native mechanisms:
//! Windows Portable Devices over COM, a gvfs mount of the device, or the MTP protocol itself
//! through `mtp-rs`. Callers pick one through a [`BackendContext`] and never see which is
//! in play.
//!
//! ```no_run
//! use mtp_access::{BackendContext, walk};
//!
//! let mut context = BackendContext::from_env()?;
//! for mut device in context.enumerate()? {
//!     for entry in walk(&device, "Internal storage/DCIM") {
//!         let entry = entry?;
//!         println!("{}: {} files", entry.path, entry.files.len());
//!     }
//!     device.close()?;
//! }
//! context.shutdown()?;
//! # Ok::<(), mtp_access::AccessError>(())
//! ```
//!
//! Logical paths look like `<composite name>/<storage>/<dir>/.../<leaf>`, where the composite
//! name is `"{name}_{description}_{serial}"`. Both `/` and `\` separate segments. A segment
//! that does not exist resolves to `None`, never to an error.

mod backend;
mod config;
mod content;
mod context;
mod device;
mod enumerator;
mod error;
mod ignore_poison;
mod makedirs;
mod transfer;
mod walker;

pub use backend::{BackendKind, SpaceInfo};
#[cfg(any(test, feature = "virtual-device"))]
pub use backend::virtual_device::VirtualDevice;
pub use config::{AccessConfig, BackendPreference, DEFAULT_BLOCK_SIZE, DEFAULT_PROTOCOL_TIMEOUT_SECS};
pub use content::{Children, ContentInfo, ContentKind, ContentNode, path};
pub use context::BackendContext;
pub use device::{Device, DeviceIdentity, get_content_from_device_path};
pub use error::AccessError;
pub use makedirs::makedirs;
pub use transfer::ProgressFn;
pub use walker::{Walk, WalkEntry, walk};

#[cfg(test)]
mod test_support;


#[cfg(test)]
mod context_test;



#[cfg(test)]
mod transfer_test;

#[cfg(test)]
mod walker_test;
