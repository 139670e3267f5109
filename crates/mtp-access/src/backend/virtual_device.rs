//! In-memory devices for tests and demos.
//!
//! A [`VirtualDevice`] is a fake device tree built with a small builder API. Clones share the
//! same tree, so a test can keep one clone to inspect what the library wrote through another.
//!
//! ```ignore
//! let phone = VirtualDevice::new("Phone", "ModelX", "SN123")
//!     .with_storage("Internal")
//!     .with_file("Internal/DCIM/a.jpg", b"jpeg".to_vec());
//! let mut context = BackendContext::virtual_devices(vec![phone.clone()]);
//! ```

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info};
use std::io::{Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use super::{Backend, BackendKind, DeviceSession, EntryStream, ObjectId, RawEntry, SpaceInfo};
use crate::content::ContentKind;
use crate::device::DeviceIdentity;
use crate::error::AccessError;
use crate::ignore_poison::IgnorePoison;
use crate::transfer::{ProgressFn, copy_chunked};

#[derive(Debug, Clone)]
struct Entry {
    path: String,
    kind: ContentKind,
    data: Vec<u8>,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ListingFailure {
    path: String,
    /// Entries yielded before failing. `None` fails before the first entry.
    after: Option<usize>,
}

#[derive(Debug, Default)]
struct Store {
    entries: Vec<Entry>,
    failures: Vec<ListingFailure>,
    storages_unreadable: bool,
    space: Option<SpaceInfo>,
    close_count: usize,
}

impl Store {
    fn find(&self, path: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.path == path)
    }

    fn insert(&mut self, path: &str, kind: ContentKind, data: Vec<u8>) {
        self.ensure_parents(path);
        let modified = fixed_timestamp(self.entries.len());
        match self.entries.iter_mut().find(|e| e.path == path) {
            Some(existing) => {
                existing.kind = kind;
                existing.data = data;
                existing.modified = modified;
            }
            None => self.entries.push(Entry {
                path: path.to_string(),
                kind,
                data,
                modified,
            }),
        }
    }

    fn ensure_parents(&mut self, path: &str) {
        let segments: Vec<&str> = path.split('/').collect();
        for depth in 1..segments.len() {
            let prefix = segments[..depth].join("/");
            if self.find(&prefix).is_none() {
                let kind = if depth == 1 {
                    ContentKind::Storage
                } else {
                    ContentKind::Directory
                };
                let modified = fixed_timestamp(self.entries.len());
                self.entries.push(Entry {
                    path: prefix,
                    kind,
                    data: Vec::new(),
                    modified,
                });
            }
        }
    }
}

/// Deterministic, distinct timestamps so repeated reads compare equal.
fn fixed_timestamp(seq: usize) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seq as i64, 0)
        .single()
        .unwrap_or_default()
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn name_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// A fake device. Paths are `/`-separated and start with the storage name.
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    identity: DeviceIdentity,
    store: Arc<Mutex<Store>>,
}

impl VirtualDevice {
    pub fn new(name: &str, description: &str, serial_number: &str) -> Self {
        Self {
            identity: DeviceIdentity::new(name, description, serial_number),
            store: Arc::new(Mutex::new(Store::default())),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn with_storage(self, name: &str) -> Self {
        self.store.lock_ignore_poison().insert(name, ContentKind::Storage, Vec::new());
        self
    }

    /// Adds a directory, creating missing parents. The first segment becomes a storage.
    pub fn with_directory(self, path: &str) -> Self {
        self.store.lock_ignore_poison().insert(path, ContentKind::Directory, Vec::new());
        self
    }

    /// Adds a file, creating missing parents.
    pub fn with_file(self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.store.lock_ignore_poison().insert(path, ContentKind::File, data.into());
        self
    }

    /// Adds an entry the device cannot classify.
    pub fn with_undefined(self, path: &str) -> Self {
        self.store.lock_ignore_poison().insert(path, ContentKind::Undefined, Vec::new());
        self
    }

    /// Makes listing `path` fail before yielding anything.
    pub fn with_failing_listing(self, path: &str) -> Self {
        self.store.lock_ignore_poison().failures.push(ListingFailure {
            path: path.to_string(),
            after: None,
        });
        self
    }

    /// Makes listing `path` fail after yielding `after` entries.
    pub fn with_listing_failing_after(self, path: &str, after: usize) -> Self {
        self.store.lock_ignore_poison().failures.push(ListingFailure {
            path: path.to_string(),
            after: Some(after),
        });
        self
    }

    /// Makes the storage listing itself fail, so the device never becomes ready.
    pub fn with_unreadable_storages(self) -> Self {
        self.store.lock_ignore_poison().storages_unreadable = true;
        self
    }

    pub fn with_space(self, total_bytes: u64, available_bytes: u64) -> Self {
        self.store.lock_ignore_poison().space = Some(SpaceInfo {
            total_bytes,
            available_bytes,
        });
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.store.lock_ignore_poison().find(path).is_some()
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        let store = self.store.lock_ignore_poison();
        store
            .find(path)
            .filter(|e| e.kind == ContentKind::File)
            .map(|e| e.data.clone())
    }

    /// How many times a session for this device has been closed.
    pub fn close_count(&self) -> usize {
        self.store.lock_ignore_poison().close_count
    }
}

pub(crate) struct VirtualBackend {
    devices: Vec<VirtualDevice>,
    block_size: usize,
}

impl VirtualBackend {
    pub fn new(devices: Vec<VirtualDevice>, block_size: usize) -> Self {
        Self { devices, block_size }
    }
}

impl Backend for VirtualBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Virtual
    }

    fn initialize(&mut self) -> Result<(), AccessError> {
        info!("Virtual backend ready with {} device(s)", self.devices.len());
        Ok(())
    }

    fn discover(&mut self) -> Result<Vec<Box<dyn DeviceSession>>, AccessError> {
        Ok(self
            .devices
            .iter()
            .map(|device| {
                Box::new(VirtualSession {
                    identity: device.identity.clone(),
                    store: Arc::clone(&device.store),
                    block_size: self.block_size,
                }) as Box<dyn DeviceSession>
            })
            .collect())
    }

    fn shutdown(&mut self) -> Result<(), AccessError> {
        debug!("Virtual backend shut down");
        Ok(())
    }
}

struct VirtualSession {
    identity: DeviceIdentity,
    store: Arc<Mutex<Store>>,
    block_size: usize,
}

impl VirtualSession {
    fn path_of(id: &ObjectId) -> Result<String, AccessError> {
        match id {
            ObjectId::Path(path) => Ok(path.to_string_lossy().into_owned()),
            other => Err(AccessError::backend(format!("foreign object id {other:?}"))),
        }
    }

    fn raw(entry: &Entry) -> RawEntry {
        RawEntry {
            name: name_of(&entry.path).to_string(),
            kind: entry.kind,
            size: Some(entry.data.len() as u64),
            modified: Some(entry.modified),
            id: ObjectId::Path(PathBuf::from(&entry.path)),
        }
    }
}

impl DeviceSession for VirtualSession {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn root_id(&self) -> ObjectId {
        ObjectId::Path(PathBuf::new())
    }

    fn list_storages(&self) -> Result<Vec<RawEntry>, AccessError> {
        let store = self.store.lock_ignore_poison();
        if store.storages_unreadable {
            return Err(AccessError::backend("storage list unavailable"));
        }
        Ok(store
            .entries
            .iter()
            .filter(|e| e.kind == ContentKind::Storage)
            .map(Self::raw)
            .collect())
    }

    fn list_children(&self, parent: &ObjectId) -> Result<EntryStream, AccessError> {
        let parent = Self::path_of(parent)?;
        let store = self.store.lock_ignore_poison();

        if store.find(&parent).is_none() {
            return Err(AccessError::backend(format!("no such directory: {parent}")));
        }

        let children: Vec<RawEntry> = store
            .entries
            .iter()
            .filter(|e| parent_of(&e.path) == parent)
            .map(Self::raw)
            .collect();

        match store.failures.iter().find(|f| f.path == parent) {
            None => Ok(Box::new(children.into_iter().map(Ok::<_, AccessError>))),
            Some(ListingFailure { after: None, .. }) => {
                Err(AccessError::backend(format!("cannot enumerate {parent}")))
            }
            Some(ListingFailure { after: Some(n), .. }) => {
                let error = AccessError::backend(format!("connection lost while enumerating {parent}"));
                Ok(Box::new(
                    children.into_iter().take(*n).map(Ok::<_, AccessError>).chain(std::iter::once(Err(error))),
                ))
            }
        }
    }

    fn create_directory(&self, parent: &ObjectId, name: &str) -> Result<(), AccessError> {
        let path = join(&Self::path_of(parent)?, name);
        let mut store = self.store.lock_ignore_poison();
        if store.find(&path).is_some() {
            return Err(AccessError::backend(format!("{path} is occupied")));
        }
        store.insert(&path, ContentKind::Directory, Vec::new());
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
        let path = join(&Self::path_of(parent)?, name);
        let mut data = Vec::with_capacity(size as usize);
        let written = copy_chunked(source, &mut data, self.block_size, size, progress)?;
        self.store.lock_ignore_poison().insert(&path, ContentKind::File, data);
        Ok(written)
    }

    fn download(
        &self,
        object: &ObjectId,
        size: u64,
        sink: &mut dyn Write,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, AccessError> {
        let path = Self::path_of(object)?;
        let data = {
            let store = self.store.lock_ignore_poison();
            match store.find(&path) {
                Some(entry) if entry.kind == ContentKind::File => entry.data.clone(),
                Some(_) => return Err(AccessError::backend(format!("{path} is not a file"))),
                None => return Err(AccessError::backend(format!("no such file: {path}"))),
            }
        };
        Ok(copy_chunked(&mut Cursor::new(data), sink, self.block_size, size, progress)?)
    }

    fn remove(&self, object: &ObjectId) -> Result<(), AccessError> {
        let path = Self::path_of(object)?;
        let prefix = format!("{path}/");
        self.store
            .lock_ignore_poison()
            .entries
            .retain(|e| e.path != path && !e.path.starts_with(&prefix));
        Ok(())
    }

    fn space_info(&self, _storage: &ObjectId) -> Result<Option<SpaceInfo>, AccessError> {
        Ok(self.store.lock_ignore_poison().space)
    }

    fn close(&self) -> Result<(), AccessError> {
        self.store.lock_ignore_poison().close_count += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creates_parents() {
        let device = VirtualDevice::new("Phone", "ModelX", "SN1").with_file("Internal/a/b/c.txt", "hi");
        assert!(device.contains("Internal"));
        assert!(device.contains("Internal/a"));
        assert!(device.contains("Internal/a/b"));
        assert_eq!(device.file_contents("Internal/a/b/c.txt"), Some(b"hi".to_vec()));
        assert_eq!(device.file_contents("Internal/a"), None);
    }

    #[test]
    fn test_listing_keeps_insertion_order() {
        let device = VirtualDevice::new("Phone", "ModelX", "SN1")
            .with_file("Internal/z.txt", "")
            .with_file("Internal/a.txt", "");
        let mut backend = VirtualBackend::new(vec![device], 16);
        let sessions = backend.discover().unwrap();
        let names: Vec<String> = sessions[0]
            .list_children(&ObjectId::Path(PathBuf::from("Internal")))
            .unwrap()
            .map(|r| r.unwrap().name)
            .collect();
        assert_eq!(names, vec!["z.txt", "a.txt"]);
    }

    #[test]
    fn test_failure_after_n_entries() {
        let device = VirtualDevice::new("Phone", "ModelX", "SN1")
            .with_file("Internal/1", "")
            .with_file("Internal/2", "")
            .with_file("Internal/3", "")
            .with_listing_failing_after("Internal", 2);
        let mut backend = VirtualBackend::new(vec![device], 16);
        let sessions = backend.discover().unwrap();
        let results: Vec<_> = sessions[0]
            .list_children(&ObjectId::Path(PathBuf::from("Internal")))
            .unwrap()
            .collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok() && results[1].is_ok());
        assert!(results[2].is_err());
    }

    #[test]
    fn test_remove_is_recursive_and_tolerates_absent() {
        let device = VirtualDevice::new("Phone", "ModelX", "SN1")
            .with_file("Internal/dir/a", "")
            .with_file("Internal/dir/sub/b", "")
            .with_file("Internal/dirx", "");
        let mut backend = VirtualBackend::new(vec![device.clone()], 16);
        let sessions = backend.discover().unwrap();
        let dir = ObjectId::Path(PathBuf::from("Internal/dir"));

        sessions[0].remove(&dir).unwrap();
        sessions[0].remove(&dir).unwrap();

        assert!(!device.contains("Internal/dir/sub/b"));
        assert!(!device.contains("Internal/dir"));
        assert!(device.contains("Internal/dirx"));
    }
}
