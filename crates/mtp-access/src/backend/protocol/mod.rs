//! Protocol backend: talks MTP over USB directly through `mtp-rs`.
//!
//! `mtp-rs` is async. The backend owns a current-thread Tokio runtime and every session call
//! blocks on it, so the rest of the crate stays synchronous. Each device call is bounded by the
//! configured timeout.

mod bus;
mod errors;

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use mtp_rs::ptp::ObjectFormatCode;
use mtp_rs::{MtpDevice, MtpDeviceBuilder, NewObjectInfo, ObjectHandle, StorageId};
use std::future::Future;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;

use self::errors::{is_missing_object, map_mtp_error};
use crate::backend::{Backend, BackendKind, DeviceSession, EntryStream, ObjectId, RawEntry, SpaceInfo};
use crate::content::ContentKind;
use crate::device::DeviceIdentity;
use crate::error::AccessError;
use crate::ignore_poison::IgnorePoison;
use crate::transfer::{ProgressFn, read_chunks};

/// Downloads can legitimately take a while before the first byte arrives.
const DOWNLOAD_OPEN_TIMEOUT_FACTOR: u32 = 10;

pub(crate) struct ProtocolBackend {
    timeout: Duration,
    block_size: usize,
    evict_on_init: bool,
    runtime: Option<Arc<Runtime>>,
}

impl ProtocolBackend {
    pub fn new(timeout: Duration, block_size: usize, evict_on_init: bool) -> Self {
        Self {
            timeout,
            block_size,
            evict_on_init,
            runtime: None,
        }
    }

    fn runtime(&self) -> Result<&Arc<Runtime>, AccessError> {
        self.runtime
            .as_ref()
            .ok_or_else(|| AccessError::backend("protocol backend is not initialized"))
    }
}

impl Backend for ProtocolBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Protocol
    }

    fn initialize(&mut self) -> Result<(), AccessError> {
        if self.evict_on_init {
            match bus::evict_bus_users() {
                Ok(freed) => debug!("Evicted holders of {} MTP device(s)", freed),
                Err(e) => warn!("Could not evict MTP bus users: {}", e),
            }
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AccessError::backend(format!("cannot start the protocol runtime: {e}")))?;
        self.runtime = Some(Arc::new(runtime));
        debug!("Protocol backend initialized (timeout {:?})", self.timeout);
        Ok(())
    }

    fn discover(&mut self) -> Result<Vec<Box<dyn DeviceSession>>, AccessError> {
        let runtime = Arc::clone(self.runtime()?);
        let found = MtpDevice::list_devices()
            .map_err(|e| AccessError::backend(format!("cannot list USB devices: {e}")))?;
        debug!("Found {} MTP device(s) on the bus", found.len());

        let mut sessions: Vec<Box<dyn DeviceSession>> = Vec::with_capacity(found.len());
        for entry in found {
            let location_id = entry.location_id;
            let opened = runtime.block_on(
                MtpDeviceBuilder::new()
                    .timeout(self.timeout)
                    .open_by_location(location_id),
            );
            let device = match opened {
                Ok(device) => device,
                Err(e) => {
                    let mapped = map_mtp_error(e, &format!("mtp-{location_id}"));
                    warn!("Skipping MTP device at location {}: {}", location_id, mapped);
                    continue;
                }
            };

            let identity = identity_of(&device);
            info!("Opened MTP device {}", identity.composite_name);
            sessions.push(Box::new(ProtocolSession {
                identity,
                runtime: Arc::clone(&runtime),
                device: Mutex::new(Some(device)),
                timeout: self.timeout,
                block_size: self.block_size,
            }));
        }
        Ok(sessions)
    }

    fn shutdown(&mut self) -> Result<(), AccessError> {
        if self.runtime.take().is_some() {
            debug!("Protocol runtime stopped");
        }
        Ok(())
    }

    fn evict_bus_users(&mut self) -> Result<usize, AccessError> {
        bus::evict_bus_users()
    }
}

fn identity_of(device: &MtpDevice) -> DeviceIdentity {
    let info = device.device_info();
    let name = if info.manufacturer.is_empty() {
        info.model.clone()
    } else {
        info.manufacturer.clone()
    };
    DeviceIdentity::new(name, info.model.clone(), info.serial_number.clone())
}

/// Bounds one device call. A timeout surfaces as `mtp_rs::Error::Timeout`.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, mtp_rs::Error>>,
) -> Result<T, mtp_rs::Error> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(mtp_rs::Error::Timeout))
}

/// `None` addresses the storage root in `mtp-rs` calls.
/// Runs a single-shot transfer, reporting `(0, size)` before and `(size, size)` after it succeeds.
fn report_around<T>(
    size: u64,
    progress: Option<ProgressFn<'_>>,
    send: impl FnOnce() -> Result<T, AccessError>,
) -> Result<T, AccessError> {
    if let Some(report) = progress {
        report(0, size);
    }
    let sent = send()?;
    if let Some(report) = progress {
        report(size, size);
    }
    Ok(sent)
}

fn parent_handle(handle: u32) -> Option<ObjectHandle> {
    if handle == ObjectHandle::ROOT.0 {
        None
    } else {
        Some(ObjectHandle(handle))
    }
}

fn split_id(id: &ObjectId) -> Result<(u32, u32), AccessError> {
    match id {
        ObjectId::Handle { storage, handle } => Ok((*storage, *handle)),
        other => Err(AccessError::backend(format!("not a protocol object: {other:?}"))),
    }
}

fn convert_datetime(dt: mtp_rs::ptp::DateTime) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(dt.year as i32, dt.month as u32, dt.day as u32)?
        .and_hms_opt(dt.hour as u32, dt.minute as u32, dt.second as u32)
        .map(|naive| naive.and_utc())
}

fn entry(
    storage: u32,
    handle: ObjectHandle,
    name: String,
    is_dir: bool,
    size: u64,
    modified: Option<mtp_rs::ptp::DateTime>,
) -> RawEntry {
    RawEntry {
        name,
        kind: if is_dir { ContentKind::Directory } else { ContentKind::File },
        size: (!is_dir).then_some(size),
        modified: modified.and_then(convert_datetime),
        id: ObjectId::Handle {
            storage,
            handle: handle.0,
        },
    }
}

struct ProtocolSession {
    identity: DeviceIdentity,
    runtime: Arc<Runtime>,
    /// `None` after close. Dropping the device ends the MTP session.
    device: Mutex<Option<MtpDevice>>,
    timeout: Duration,
    block_size: usize,
}

impl ProtocolSession {
    /// Runs `f` against the open device while holding the session lock.
    fn with_device<T>(
        &self,
        f: impl FnOnce(&MtpDevice, &Runtime) -> Result<T, mtp_rs::Error>,
    ) -> Result<T, AccessError> {
        let guard = self.device.lock_ignore_poison();
        let device = guard
            .as_ref()
            .ok_or_else(|| AccessError::backend(format!("{}: session closed", self.identity.composite_name)))?;
        f(device, &self.runtime).map_err(|e| map_mtp_error(e, &self.identity.composite_name))
    }
}

impl DeviceSession for ProtocolSession {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn root_id(&self) -> ObjectId {
        ObjectId::Handle { storage: 0, handle: 0 }
    }

    fn list_storages(&self) -> Result<Vec<RawEntry>, AccessError> {
        let limit = self.timeout;
        let storages = self.with_device(|device, rt| rt.block_on(bounded(limit, device.storages())))?;
        Ok(storages
            .iter()
            .map(|storage| {
                let info = storage.info();
                RawEntry {
                    name: info.description.clone(),
                    kind: ContentKind::Storage,
                    size: None,
                    modified: None,
                    id: ObjectId::Handle {
                        storage: storage.id().0,
                        handle: ObjectHandle::ROOT.0,
                    },
                }
            })
            .collect())
    }

    fn list_children(&self, parent: &ObjectId) -> Result<EntryStream, AccessError> {
        let (storage_id, handle) = split_id(parent)?;
        let limit = self.timeout;
        // The device returns a whole directory per request, so the stream is backed by a Vec.
        let infos = self.with_device(|device, rt| rt.block_on(async {
            let storage = bounded(limit, device.storage(StorageId(storage_id))).await?;
            bounded(limit, storage.list_objects(parent_handle(handle))).await
        }))?;
        let entries: Vec<RawEntry> = infos
            .into_iter()
            .map(|info| {
                let is_dir = info.format == ObjectFormatCode::Association;
                entry(storage_id, info.handle, info.filename, is_dir, info.size, info.modified)
            })
            .collect();
        Ok(Box::new(entries.into_iter().map(Ok::<_, AccessError>)))
    }

    fn create_directory(&self, parent: &ObjectId, name: &str) -> Result<(), AccessError> {
        let (storage_id, handle) = split_id(parent)?;
        let limit = self.timeout;
        let created = self.with_device(|device, rt| rt.block_on(async {
            let storage = bounded(limit, device.storage(StorageId(storage_id))).await?;
            bounded(limit, storage.create_folder(parent_handle(handle), name)).await
        }))?;
        debug!("Created folder {} with handle {}", name, created.0);
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
        let (storage_id, handle) = split_id(parent)?;
        let limit = self.timeout * DOWNLOAD_OPEN_TIMEOUT_FACTOR;

        // mtp-rs needs the whole object as a stream of owned chunks before the transfer starts.
        let chunks = read_chunks(source, size, self.block_size)?;
        let data = futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, std::io::Error>(bytes::Bytes::from(chunk)))
                .collect::<Vec<_>>(),
        );

        let object_info = NewObjectInfo::file(name, size);
        let created = report_around(size, progress, || {
            self.with_device(|device, rt| rt.block_on(async {
                let storage = bounded(limit, device.storage(StorageId(storage_id))).await?;
                bounded(limit, storage.upload(parent_handle(handle), object_info, data)).await
            }))
        })?;

        debug!("Uploaded {} ({} bytes) as handle {}", name, size, created.0);
        Ok(size)
    }

    fn download(
        &self,
        object: &ObjectId,
        size: u64,
        sink: &mut dyn Write,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, AccessError> {
        let (storage_id, handle) = split_id(object)?;
        let limit = self.timeout;
        let written = self.with_device(|device, rt| rt.block_on(async {
            let storage = bounded(limit, device.storage(StorageId(storage_id))).await?;
            let mut download = bounded(
                limit * DOWNLOAD_OPEN_TIMEOUT_FACTOR,
                storage.download_stream(ObjectHandle(handle)),
            )
            .await?;

            let mut written = 0u64;
            while let Some(chunk) = download.next_chunk().await {
                let chunk = chunk?;
                sink.write_all(&chunk).map_err(mtp_rs::Error::Io)?;
                written += chunk.len() as u64;
                if let Some(report) = progress {
                    report(written, size);
                }
            }
            sink.flush().map_err(mtp_rs::Error::Io)?;
            Ok::<_, mtp_rs::Error>(written)
        }))?;
        Ok(written)
    }

    fn remove(&self, object: &ObjectId) -> Result<(), AccessError> {
        let (storage_id, handle) = split_id(object)?;
        let limit = self.timeout;
        let result = self.with_device(|device, rt| rt.block_on(async {
            let storage = bounded(limit, device.storage(StorageId(storage_id))).await?;
            match delete_recursive(&storage, ObjectHandle(handle), limit).await {
                Err(e) if is_missing_object(&e) => {
                    debug!("Object {} already gone", handle);
                    Ok(())
                }
                other => other,
            }
        }));
        result.map_err(|e| e.context("remove"))
    }

    fn space_info(&self, storage: &ObjectId) -> Result<Option<SpaceInfo>, AccessError> {
        let (storage_id, _) = split_id(storage)?;
        let limit = self.timeout;
        let info = self.with_device(|device, rt| rt.block_on(async {
            let storage = bounded(limit, device.storage(StorageId(storage_id))).await?;
            let info = storage.info();
            Ok::<_, mtp_rs::Error>((info.max_capacity, info.free_space_bytes))
        }))?;
        Ok(Some(SpaceInfo {
            total_bytes: info.0,
            available_bytes: info.1,
        }))
    }

    fn close(&self) -> Result<(), AccessError> {
        if let Some(device) = self.device.lock_ignore_poison().take() {
            drop(device);
            debug!("Closed MTP session for {}", self.identity.composite_name);
        }
        Ok(())
    }
}

/// MTP delete does not recurse, so children go first.
async fn delete_recursive(
    storage: &mtp_rs::Storage,
    handle: ObjectHandle,
    limit: Duration,
) -> Result<(), mtp_rs::Error> {
    let info = bounded(limit, storage.get_object_info(handle)).await?;
    if info.format == ObjectFormatCode::Association {
        let children = bounded(limit, storage.list_objects(Some(handle))).await?;
        for child in children {
            Box::pin(delete_recursive(storage, child.handle, limit)).await?;
        }
    }
    bounded(limit, storage.delete(handle)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_single_shot_upload_reports_start_and_completion() {
        let reports = RefCell::new(Vec::new());
        let progress = |done: u64, total: u64| reports.borrow_mut().push((done, total));

        let sent = report_around(4096, Some(&progress), || Ok(7u32)).unwrap();

        assert_eq!(sent, 7);
        assert_eq!(reports.into_inner(), vec![(0, 4096), (4096, 4096)]);
    }

    #[test]
    fn test_failed_single_shot_upload_never_reports_completion() {
        let reports = RefCell::new(Vec::new());
        let progress = |done: u64, total: u64| reports.borrow_mut().push((done, total));

        let err = report_around::<()>(10, Some(&progress), || Err(AccessError::backend("device busy"))).unwrap_err();

        assert!(err.to_string().contains("device busy"));
        assert_eq!(reports.into_inner(), vec![(0, 10)]);
    }

    #[test]
    fn test_parent_handle_maps_root_to_none() {
        assert_eq!(parent_handle(ObjectHandle::ROOT.0), None);
        assert_eq!(parent_handle(42), Some(ObjectHandle(42)));
    }

    #[test]
    fn test_split_id_rejects_foreign_ids() {
        let id = ObjectId::Handle { storage: 0x10001, handle: 7 };
        assert_eq!(split_id(&id), Ok((0x10001, 7)));
        assert!(split_id(&ObjectId::Path("a".into())).is_err());
    }

    #[test]
    fn test_uninitialized_backend_refuses_discovery() {
        let mut backend = ProtocolBackend::new(Duration::from_secs(1), 1024, false);
        assert!(backend.discover().is_err());
        assert!(backend.shutdown().is_ok());
    }
}
