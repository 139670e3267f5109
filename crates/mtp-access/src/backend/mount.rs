//! Devices mounted by the desktop session (gvfs) as plain directories.
//!
//! The mount root holds one directory per device, named like `mtp:host=Name_Model_Serial`.
//! Inside it, each top-level directory is a storage. Everything else is ordinary file I/O.

use chrono::{DateTime, Utc};
use log::{debug, info};
use std::fs::{self, DirEntry, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use super::{Backend, BackendKind, DeviceSession, EntryStream, ObjectId, RawEntry, SpaceInfo};
use crate::content::ContentKind;
use crate::device::DeviceIdentity;
use crate::error::AccessError;
use crate::transfer::{ProgressFn, copy_chunked};

/// Prefix gvfs gives MTP device mounts. Other mounts (SMB shares, SFTP) are ignored.
const MTP_MOUNT_PREFIX: &str = "mtp:";

pub(crate) struct MountBackend {
    root: PathBuf,
    block_size: usize,
}

impl MountBackend {
    pub fn new(root: PathBuf, block_size: usize) -> Self {
        Self { root, block_size }
    }
}

impl Backend for MountBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mount
    }

    fn initialize(&mut self) -> Result<(), AccessError> {
        if !self.root.is_dir() {
            return Err(AccessError::backend(format!(
                "mount root {} does not exist",
                self.root.display()
            )));
        }
        info!("Mount backend using {}", self.root.display());
        Ok(())
    }

    fn discover(&mut self) -> Result<Vec<Box<dyn DeviceSession>>, AccessError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| AccessError::backend(format!("cannot list {}: {}", self.root.display(), e)))?;

        let mut sessions: Vec<Box<dyn DeviceSession>> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let dir_name = entry.file_name().to_string_lossy().into_owned();
            if !dir_name.starts_with(MTP_MOUNT_PREFIX) || !entry.path().is_dir() {
                debug!("Skipping non-MTP mount {}", dir_name);
                continue;
            }
            let identity = parse_mount_name(&dir_name);
            debug!("Found mounted device {} in {}", identity.composite_name, dir_name);
            sessions.push(Box::new(MountSession {
                identity,
                device_dir: entry.path(),
                block_size: self.block_size,
            }));
        }
        Ok(sessions)
    }

    fn shutdown(&mut self) -> Result<(), AccessError> {
        debug!("Mount backend shut down");
        Ok(())
    }
}

/// Derives the identity from a mount directory name.
///
/// The part after `=` is the composite name. When it contains `_`, the first part is the name,
/// the second to last the description, and the last the serial number.
pub(crate) fn parse_mount_name(dir_name: &str) -> DeviceIdentity {
    let composite = dir_name.split_once('=').map_or(dir_name, |(_, rest)| rest);

    let (name, description, serial_number) = if composite.contains('_') {
        let parts: Vec<&str> = composite.split('_').collect();
        (parts[0], parts[parts.len() - 2], parts[parts.len() - 1])
    } else {
        ("Unknown", "Unknown", "Unknown")
    };

    DeviceIdentity {
        name: name.to_string(),
        description: description.to_string(),
        serial_number: serial_number.to_string(),
        composite_name: composite.to_string(),
    }
}

struct MountSession {
    identity: DeviceIdentity,
    device_dir: PathBuf,
    block_size: usize,
}

impl MountSession {
    fn resolve(&self, id: &ObjectId) -> Result<PathBuf, AccessError> {
        match id {
            ObjectId::Path(relative) => Ok(self.device_dir.join(relative)),
            other => Err(AccessError::backend(format!("foreign object id {other:?}"))),
        }
    }

    fn relative(id: &ObjectId) -> PathBuf {
        match id {
            ObjectId::Path(relative) => relative.clone(),
            _ => PathBuf::new(),
        }
    }
}

fn raw_entry(parent: &Path, entry: &DirEntry) -> RawEntry {
    let name = entry.file_name().to_string_lossy().into_owned();
    let id = ObjectId::Path(parent.join(&name));

    // Follow links: gvfs may expose entries as symlinks.
    match fs::metadata(entry.path()) {
        Ok(metadata) => {
            let kind = if metadata.is_dir() {
                ContentKind::Directory
            } else if metadata.is_file() {
                ContentKind::File
            } else {
                ContentKind::Undefined
            };
            RawEntry {
                name,
                kind,
                size: Some(metadata.len()),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                id,
            }
        }
        Err(e) => {
            debug!("No metadata for {}: {}", entry.path().display(), e);
            RawEntry {
                name,
                kind: ContentKind::Undefined,
                size: None,
                modified: None,
                id,
            }
        }
    }
}

impl DeviceSession for MountSession {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn root_id(&self) -> ObjectId {
        ObjectId::Path(PathBuf::new())
    }

    fn list_storages(&self) -> Result<Vec<RawEntry>, AccessError> {
        let entries = fs::read_dir(&self.device_dir)
            .map_err(|e| AccessError::backend(format!("cannot access {}: {}", self.identity.composite_name, e)))?;

        let mut storages = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_dir() {
                debug!("Ignoring {} at the top of {}", name, self.identity.composite_name);
                continue;
            }
            storages.push(RawEntry {
                id: ObjectId::Path(PathBuf::from(&name)),
                name,
                kind: ContentKind::Storage,
                size: None,
                modified: None,
            });
        }
        Ok(storages)
    }

    fn list_children(&self, parent: &ObjectId) -> Result<EntryStream, AccessError> {
        let dir = self.resolve(parent)?;
        let relative = Self::relative(parent);
        let reader = fs::read_dir(&dir)?;

        Ok(Box::new(reader.map(move |entry| -> Result<RawEntry, AccessError> {
            let entry = entry?;
            Ok(raw_entry(&relative, &entry))
        })))
    }

    fn create_directory(&self, parent: &ObjectId, name: &str) -> Result<(), AccessError> {
        let path = self.resolve(parent)?.join(name);
        fs::create_dir(&path)?;
        Ok(())
    }

    fn upload(
        &self,
        parent: &ObjectId,
        name: &str,
        source: &mut dyn Read,
        size: u64,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, AccessError> {
        let path = self.resolve(parent)?.join(name);
        let mut file = File::create(&path)?;
        let written = copy_chunked(source, &mut file, self.block_size, size, progress)?;
        file.flush()?;
        Ok(written)
    }

    fn download(
        &self,
        object: &ObjectId,
        size: u64,
        sink: &mut dyn Write,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, AccessError> {
        let mut file = File::open(self.resolve(object)?)?;
        Ok(copy_chunked(&mut file, sink, self.block_size, size, progress)?)
    }

    fn remove(&self, object: &ObjectId) -> Result<(), AccessError> {
        let path = self.resolve(object)?;
        let result = match fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&path),
            Ok(_) => fs::remove_file(&path),
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} already gone", path.display());
                Ok(())
            }
            other => Ok(other?),
        }
    }

    fn space_info(&self, storage: &ObjectId) -> Result<Option<SpaceInfo>, AccessError> {
        space_info_for_path(&self.resolve(storage)?).map(Some)
    }

    fn close(&self) -> Result<(), AccessError> {
        debug!("Released mounted device {}", self.identity.composite_name);
        Ok(())
    }
}

#[cfg(unix)]
fn space_info_for_path(path: &Path) -> Result<SpaceInfo, AccessError> {
    use std::ffi::CString;

    let path_c = CString::new(path.to_string_lossy().as_bytes())
        .map_err(|e| AccessError::backend(format!("invalid path {}: {}", path.display(), e)))?;

    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(path_c.as_ptr(), &mut stat) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        #[allow(clippy::unnecessary_cast, reason = "statvfs field types vary across platforms")]
        let block_size = stat.f_frsize as u64;
        #[allow(clippy::unnecessary_cast, reason = "statvfs field types vary across platforms")]
        let total_bytes = (stat.f_blocks as u64) * block_size;
        #[allow(clippy::unnecessary_cast, reason = "statvfs field types vary across platforms")]
        let available_bytes = (stat.f_bavail as u64) * block_size;
        Ok(SpaceInfo {
            total_bytes,
            available_bytes,
        })
    }
}

#[cfg(not(unix))]
fn space_info_for_path(path: &Path) -> Result<SpaceInfo, AccessError> {
    Err(AccessError::backend(format!(
        "space information for {} is not available on this platform",
        path.display()
    )))
}
