//! COM backend: Windows Portable Devices (WPD).
//!
//! WPD addresses every object by an opaque string ID. The device itself is the object `DEVICE`,
//! whose children are the storages (functional objects). COM is initialized multithreaded when
//! the backend starts and uninitialized at shutdown.

use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use std::io::{self, Read, Write};
use std::ptr::null_mut;
use std::thread::{self, ThreadId};
use windows::Win32::Devices::PortableDevices::{
    IEnumPortableDeviceObjectIDs, IPortableDevice, IPortableDeviceContent, IPortableDeviceKeyCollection,
    IPortableDeviceManager, IPortableDeviceProperties, IPortableDevicePropVariantCollection,
    IPortableDeviceValues, PortableDeviceFTM, PortableDeviceKeyCollection, PortableDeviceManager,
    PortableDevicePropVariantCollection, PortableDeviceValues, WPD_CLIENT_MAJOR_VERSION,
    WPD_CLIENT_MINOR_VERSION, WPD_CLIENT_NAME, WPD_CLIENT_REVISION, WPD_CLIENT_SECURITY_QUALITY_OF_SERVICE,
    WPD_DEVICE_SERIAL_NUMBER, WPD_OBJECT_CONTENT_TYPE, WPD_OBJECT_DATE_MODIFIED, WPD_OBJECT_ID,
    WPD_OBJECT_NAME, WPD_OBJECT_ORIGINAL_FILE_NAME, WPD_OBJECT_PARENT_ID, WPD_OBJECT_SIZE,
    WPD_RESOURCE_DEFAULT, WPD_STORAGE_CAPACITY, WPD_STORAGE_FREE_SPACE_IN_BYTES,
};
use windows::Win32::System::Com::{
    CLSCTX_INPROC_SERVER, COINIT_MULTITHREADED, CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize,
    IStream, STGC_DEFAULT,
};
use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;
use windows::core::{GUID, PCWSTR, PWSTR};

use crate::backend::batched::{Batch, BatchedIds};
use crate::backend::{Backend, BackendKind, DeviceSession, EntryStream, ObjectId, RawEntry, SpaceInfo};
use crate::content::ContentKind;
use crate::device::DeviceIdentity;
use crate::error::AccessError;
use crate::transfer::{ProgressFn, copy_chunked};

const DEVICE_OBJECT_ID: &str = "DEVICE";
const CLIENT_NAME: &str = "mtp-access";

const CONTENT_TYPE_FOLDER: GUID = GUID::from_u128(0x27e2e392_a111_48e0_ab0c_e17705a05f85);
const CONTENT_TYPE_FUNCTIONAL_OBJECT: GUID = GUID::from_u128(0x99ed0160_17ff_4c44_9d98_1d7a6f941921);
const FUNCTIONAL_CATEGORY_STORAGE: GUID = GUID::from_u128(0x23f05bbc_15de_4c2a_a55b_a9af5ce412ef);
const CONTENT_TYPE_GENERIC_FILE: GUID = GUID::from_u128(0x0085e0a6_8d34_45d7_bc5c_447e59c73d48);

/// `PORTABLE_DEVICE_DELETE_WITH_RECURSION`
const DELETE_WITH_RECURSION: u32 = 1;
/// `HRESULT_FROM_WIN32(ERROR_FILE_NOT_FOUND)`, returned for objects that no longer exist.
const HRESULT_NOT_FOUND: u32 = 0x8007_0002;
const ENUM_BATCH: usize = 100;
/// Days between the OLE automation epoch (1899-12-30) and the Unix epoch.
const OLE_UNIX_EPOCH_DAYS: f64 = 25_569.0;

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn com_error(op: &str, e: windows::core::Error) -> AccessError {
    AccessError::backend(format!("{op}: {e}"))
}

fn is_not_found(e: &windows::core::Error) -> bool {
    e.code().0 as u32 == HRESULT_NOT_FOUND
}

/// Takes ownership of a COM-allocated string.
///
/// # Safety
///
/// `ptr` must be null or a string allocated with `CoTaskMemAlloc`.
unsafe fn take_pwstr(ptr: PWSTR) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let value = unsafe { ptr.to_string() }.ok();
    unsafe { CoTaskMemFree(Some(ptr.0 as *const _)) };
    value
}

fn ole_date_to_utc(days: f64) -> Option<DateTime<Utc>> {
    if !days.is_finite() {
        return None;
    }
    let seconds = ((days - OLE_UNIX_EPOCH_DAYS) * 86_400.0).round() as i64;
    DateTime::from_timestamp(seconds, 0)
}

fn kind_of(content_type: Option<GUID>) -> ContentKind {
    match content_type {
        Some(t) if t == CONTENT_TYPE_FOLDER => ContentKind::Directory,
        Some(t) if t == CONTENT_TYPE_FUNCTIONAL_OBJECT || t == FUNCTIONAL_CATEGORY_STORAGE => ContentKind::Storage,
        Some(_) => ContentKind::File,
        None => ContentKind::Undefined,
    }
}

fn create_values() -> Result<IPortableDeviceValues, AccessError> {
    unsafe { CoCreateInstance(&PortableDeviceValues, None, CLSCTX_INPROC_SERVER) }
        .map_err(|e| com_error("create property values", e))
}

fn create_keys(keys: &[&PROPERTYKEY]) -> Result<IPortableDeviceKeyCollection, AccessError> {
    let collection: IPortableDeviceKeyCollection =
        unsafe { CoCreateInstance(&PortableDeviceKeyCollection, None, CLSCTX_INPROC_SERVER) }
            .map_err(|e| com_error("create key collection", e))?;
    for key in keys {
        unsafe { collection.Add(*key) }.map_err(|e| com_error("add property key", e))?;
    }
    Ok(collection)
}

fn string_value(values: &IPortableDeviceValues, key: &PROPERTYKEY) -> Option<String> {
    let ptr = unsafe { values.GetStringValue(key) }.ok()?;
    unsafe { take_pwstr(ptr) }.filter(|s| !s.is_empty())
}

/// Process-level WPD state: COM apartment plus the device manager.
pub(crate) struct ComBackend {
    block_size: usize,
    /// Thread that called `CoInitializeEx`; `CoUninitialize` must run on the same one.
    com_thread: Option<ThreadId>,
    manager: Option<IPortableDeviceManager>,
}

// COM interfaces are only touched behind the context's exclusive borrow. The context may move
// between threads, but COM teardown only happens on the thread that initialized it.
unsafe impl Send for ComBackend {}

impl ComBackend {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            com_thread: None,
            manager: None,
        }
    }

    /// Whether COM should be uninitialized from `current`. Clears the owner either way.
    fn release_com_on(&mut self, current: ThreadId) -> bool {
        match self.com_thread.take() {
            Some(owner) if owner == current => true,
            Some(owner) => {
                warn!(
                    "COM backend shut down on {:?} but initialized on {:?}; leaving COM initialized",
                    current, owner
                );
                false
            }
            None => false,
        }
    }

    fn manager(&self) -> Result<&IPortableDeviceManager, AccessError> {
        self.manager
            .as_ref()
            .ok_or_else(|| AccessError::backend("COM backend is not initialized"))
    }

    /// Reads one of the manager's per-device strings with the two-call length pattern.
    fn device_string(
        &self,
        device_id: &[u16],
        read: impl Fn(&IPortableDeviceManager, PCWSTR, PWSTR, *mut u32) -> windows::core::Result<()>,
    ) -> Option<String> {
        let manager = self.manager().ok()?;
        let id = PCWSTR(device_id.as_ptr());
        let mut length: u32 = 0;
        let _ = read(manager, id, PWSTR::null(), &mut length);
        if length == 0 {
            return None;
        }
        let mut buffer = vec![0u16; length as usize];
        read(manager, id, PWSTR(buffer.as_mut_ptr()), &mut length).ok()?;
        let end = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
        Some(String::from_utf16_lossy(&buffer[..end])).filter(|s| !s.is_empty())
    }

    fn open(&self, device_id: &str) -> Result<ComSession, AccessError> {
        let device: IPortableDevice = unsafe { CoCreateInstance(&PortableDeviceFTM, None, CLSCTX_INPROC_SERVER) }
            .map_err(|e| com_error("create device object", e))?;

        let client_info = create_values()?;
        let client_name = wide(CLIENT_NAME);
        unsafe {
            client_info
                .SetStringValue(&WPD_CLIENT_NAME, PCWSTR(client_name.as_ptr()))
                .and_then(|_| client_info.SetUnsignedIntegerValue(&WPD_CLIENT_MAJOR_VERSION, 1))
                .and_then(|_| client_info.SetUnsignedIntegerValue(&WPD_CLIENT_MINOR_VERSION, 0))
                .and_then(|_| client_info.SetUnsignedIntegerValue(&WPD_CLIENT_REVISION, 0))
                .and_then(|_| client_info.SetUnsignedIntegerValue(&WPD_CLIENT_SECURITY_QUALITY_OF_SERVICE, 0x0002_0000))
                .map_err(|e| com_error("set client info", e))?;
        }

        let id_wide = wide(device_id);
        unsafe { device.Open(PCWSTR(id_wide.as_ptr()), &client_info) }
            .map_err(|e| com_error("open device", e))?;
        let content = unsafe { device.Content() }.map_err(|e| com_error("device content", e))?;
        let properties = unsafe { content.Properties() }.map_err(|e| com_error("device properties", e))?;

        let description = self
            .device_string(&id_wide, |m, id, buf, len| unsafe { m.GetDeviceDescription(id, buf, len) })
            .unwrap_or_else(|| "Unknown".to_string());
        let name = self
            .device_string(&id_wide, |m, id, buf, len| unsafe { m.GetDeviceFriendlyName(id, buf, len) })
            .unwrap_or_else(|| description.clone());
        let serial = read_serial(&properties).unwrap_or_else(|| "Unknown".to_string());

        Ok(ComSession {
            identity: DeviceIdentity::new(name, description, serial),
            device,
            content,
            properties,
            block_size: self.block_size,
        })
    }
}

fn read_serial(properties: &IPortableDeviceProperties) -> Option<String> {
    let keys = create_keys(&[&WPD_DEVICE_SERIAL_NUMBER]).ok()?;
    let id = wide(DEVICE_OBJECT_ID);
    let values = unsafe { properties.GetValues(PCWSTR(id.as_ptr()), &keys) }.ok()?;
    string_value(&values, &WPD_DEVICE_SERIAL_NUMBER)
}

impl Backend for ComBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Com
    }

    fn initialize(&mut self) -> Result<(), AccessError> {
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .ok()
            .map_err(|e| com_error("initialize COM", e))?;
        self.com_thread = Some(thread::current().id());

        let manager: IPortableDeviceManager =
            unsafe { CoCreateInstance(&PortableDeviceManager, None, CLSCTX_INPROC_SERVER) }
                .map_err(|e| com_error("create device manager", e))?;
        self.manager = Some(manager);
        debug!("COM backend initialized");
        Ok(())
    }

    fn discover(&mut self) -> Result<Vec<Box<dyn DeviceSession>>, AccessError> {
        let manager = self.manager()?;
        let mut count: u32 = 0;
        unsafe {
            let _ = manager.RefreshDeviceList();
            manager
                .GetDevices(null_mut(), &mut count)
                .map_err(|e| com_error("count devices", e))?;
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ids = vec![PWSTR::null(); count as usize];
        unsafe { manager.GetDevices(ids.as_mut_ptr(), &mut count) }.map_err(|e| com_error("list devices", e))?;
        let ids: Vec<String> = ids
            .into_iter()
            .take(count as usize)
            .filter_map(|ptr| unsafe { take_pwstr(ptr) })
            .collect();
        debug!("WPD reports {} device(s)", ids.len());

        let mut sessions: Vec<Box<dyn DeviceSession>> = Vec::with_capacity(ids.len());
        for id in ids {
            match self.open(&id) {
                Ok(session) => {
                    info!("Opened WPD device {}", session.identity.composite_name);
                    sessions.push(Box::new(session));
                }
                Err(e) => warn!("Skipping WPD device {}: {}", id, e),
            }
        }
        Ok(sessions)
    }

    fn shutdown(&mut self) -> Result<(), AccessError> {
        self.manager = None;
        if self.release_com_on(thread::current().id()) {
            unsafe { CoUninitialize() };
            debug!("COM uninitialized");
        }
        Ok(())
    }
}

struct ComSession {
    identity: DeviceIdentity,
    device: IPortableDevice,
    content: IPortableDeviceContent,
    properties: IPortableDeviceProperties,
    block_size: usize,
}

// The device is opened with the free-threaded marshaler, so its interfaces may cross threads.
unsafe impl Send for ComSession {}
unsafe impl Sync for ComSession {}

fn object_id(id: &ObjectId) -> Result<&str, AccessError> {
    match id {
        ObjectId::Object(s) => Ok(s),
        other => Err(AccessError::backend(format!("not a WPD object: {other:?}"))),
    }
}

impl ComSession {
    fn enumerate(&self, parent: &str) -> Result<ComListing, AccessError> {
        let parent_wide = wide(parent);
        let ids = unsafe { self.content.EnumObjects(0, PCWSTR(parent_wide.as_ptr()), None) }
            .map_err(|e| com_error(&format!("enumerate {parent}"), e))?;
        let keys = create_keys(&[
            &WPD_OBJECT_NAME,
            &WPD_OBJECT_ORIGINAL_FILE_NAME,
            &WPD_OBJECT_CONTENT_TYPE,
            &WPD_OBJECT_SIZE,
            &WPD_OBJECT_DATE_MODIFIED,
        ])?;
        let parent = parent.to_string();
        let fetch: NextIds = Box::new(move |count| next_ids(&ids, &parent, count));
        Ok(ComListing {
            ids: BatchedIds::new(ENUM_BATCH, fetch),
            properties: self.properties.clone(),
            keys,
        })
    }

    /// Creates the object and returns its new ID.
    fn create_object(&self, values: &IPortableDeviceValues) -> Result<String, AccessError> {
        let mut new_id = PWSTR::null();
        unsafe { self.content.CreateObjectWithPropertiesOnly(values, &mut new_id) }
            .map_err(|e| com_error("create object", e))?;
        Ok(unsafe { take_pwstr(new_id) }.unwrap_or_default())
    }
}

fn naming_values(parent: &str, name: &str, content_type: &GUID) -> Result<IPortableDeviceValues, AccessError> {
    let values = create_values()?;
    let parent_wide = wide(parent);
    let name_wide = wide(name);
    unsafe {
        values
            .SetStringValue(&WPD_OBJECT_PARENT_ID, PCWSTR(parent_wide.as_ptr()))
            .and_then(|_| values.SetStringValue(&WPD_OBJECT_NAME, PCWSTR(name_wide.as_ptr())))
            .and_then(|_| values.SetStringValue(&WPD_OBJECT_ORIGINAL_FILE_NAME, PCWSTR(name_wide.as_ptr())))
            .and_then(|_| values.SetGuidValue(&WPD_OBJECT_CONTENT_TYPE, content_type))
            .map_err(|e| com_error("set object properties", e))?;
    }
    Ok(values)
}

impl DeviceSession for ComSession {
    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn root_id(&self) -> ObjectId {
        ObjectId::Object(DEVICE_OBJECT_ID.to_string())
    }

    fn list_storages(&self) -> Result<Vec<RawEntry>, AccessError> {
        let mut storages = Vec::new();
        for entry in self.enumerate(DEVICE_OBJECT_ID)? {
            let entry = entry?;
            if entry.kind == ContentKind::Storage {
                storages.push(entry);
            } else {
                trace!("Ignoring non-storage object {} under the device root", entry.name);
            }
        }
        Ok(storages)
    }

    fn list_children(&self, parent: &ObjectId) -> Result<EntryStream, AccessError> {
        let parent = object_id(parent)?;
        Ok(Box::new(self.enumerate(parent)?))
    }

    fn create_directory(&self, parent: &ObjectId, name: &str) -> Result<(), AccessError> {
        let values = naming_values(object_id(parent)?, name, &CONTENT_TYPE_FOLDER)?;
        let id = self.create_object(&values)?;
        debug!("Created WPD folder {} as {}", name, id);
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
        let values = naming_values(object_id(parent)?, name, &CONTENT_TYPE_GENERIC_FILE)?;
        unsafe { values.SetUnsignedLargeIntegerValue(&WPD_OBJECT_SIZE, size) }
            .map_err(|e| com_error("set object size", e))?;

        let mut stream: Option<IStream> = None;
        let mut optimal: u32 = 0;
        let mut cookie = PWSTR::null();
        unsafe {
            self.content
                .CreateObjectWithPropertiesAndData(&values, &mut stream, &mut optimal, &mut cookie)
                .map_err(|e| com_error("create object data", e))?;
            let _ = take_pwstr(cookie);
        }
        let stream = stream.ok_or_else(|| AccessError::backend("device returned no upload stream"))?;

        let block_size = if optimal > 0 { optimal as usize } else { self.block_size };
        let written = copy_chunked(source, &mut StreamWriter(&stream), block_size, size, progress)?;
        unsafe { stream.Commit(STGC_DEFAULT) }.map_err(|e| com_error("commit upload", e))?;
        Ok(written)
    }

    fn download(
        &self,
        object: &ObjectId,
        size: u64,
        sink: &mut dyn Write,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<u64, AccessError> {
        let id = wide(object_id(object)?);
        let transfer = unsafe { self.content.Transfer() }.map_err(|e| com_error("transfer interface", e))?;

        let mut optimal: u32 = 0;
        let mut stream: Option<IStream> = None;
        unsafe {
            transfer
                .GetStream(PCWSTR(id.as_ptr()), &WPD_RESOURCE_DEFAULT, 0, &mut optimal, &mut stream)
                .map_err(|e| com_error("open object stream", e))?;
        }
        let stream = stream.ok_or_else(|| AccessError::backend("device returned no download stream"))?;

        let block_size = if optimal > 0 { optimal as usize } else { self.block_size };
        Ok(copy_chunked(&mut StreamReader(&stream), sink, block_size, size, progress)?)
    }

    fn remove(&self, object: &ObjectId) -> Result<(), AccessError> {
        let id = object_id(object)?;
        let id_wide = wide(id);

        // WPD wants the IDs as VT_LPWSTR variants; the values store produces exactly that.
        let scratch = create_values()?;
        let collection: IPortableDevicePropVariantCollection =
            unsafe { CoCreateInstance(&PortableDevicePropVariantCollection, None, CLSCTX_INPROC_SERVER) }
                .map_err(|e| com_error("create ID collection", e))?;
        unsafe {
            scratch
                .SetStringValue(&WPD_OBJECT_ID, PCWSTR(id_wide.as_ptr()))
                .map_err(|e| com_error("set object ID", e))?;
            let variant = scratch
                .GetValue(&WPD_OBJECT_ID)
                .map_err(|e| com_error("read object ID", e))?;
            collection.Add(&variant).map_err(|e| com_error("add object ID", e))?;
        }

        match unsafe { self.content.Delete(DELETE_WITH_RECURSION, &collection, null_mut()) } {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!("WPD object {} already gone", id);
                Ok(())
            }
            Err(e) => Err(com_error(&format!("remove {id}"), e)),
        }
    }

    fn space_info(&self, storage: &ObjectId) -> Result<Option<SpaceInfo>, AccessError> {
        let id = wide(object_id(storage)?);
        let keys = create_keys(&[&WPD_STORAGE_CAPACITY, &WPD_STORAGE_FREE_SPACE_IN_BYTES])?;
        let values = unsafe { self.properties.GetValues(PCWSTR(id.as_ptr()), &keys) }
            .map_err(|e| com_error("read storage properties", e))?;
        let total = unsafe { values.GetUnsignedLargeIntegerValue(&WPD_STORAGE_CAPACITY) };
        let free = unsafe { values.GetUnsignedLargeIntegerValue(&WPD_STORAGE_FREE_SPACE_IN_BYTES) };
        Ok(match (total, free) {
            (Ok(total_bytes), Ok(available_bytes)) => Some(SpaceInfo {
                total_bytes,
                available_bytes,
            }),
            _ => None,
        })
    }

    fn close(&self) -> Result<(), AccessError> {
        unsafe { self.device.Close() }.map_err(|e| com_error("close device", e))?;
        debug!("Closed WPD device {}", self.identity.composite_name);
        Ok(())
    }
}

type NextIds = Box<dyn FnMut(usize) -> Batch>;

/// One `Next` call. `S_FALSE` with a short batch is the normal end; any failure code is kept.
fn next_ids(ids: &IEnumPortableDeviceObjectIDs, parent: &str, count: usize) -> Batch {
    let mut batch = vec![PWSTR::null(); count];
    let mut fetched: u32 = 0;
    let result = unsafe { ids.Next(batch.as_mut_slice(), &mut fetched) };
    let received = batch
        .into_iter()
        .take(fetched as usize)
        .filter_map(|ptr| unsafe { take_pwstr(ptr) })
        .collect();
    Batch {
        ids: received,
        failure: result.ok().err().map(|e| com_error(&format!("enumerate {parent}"), e)),
    }
}

/// Lazy `EnumObjects` listing, fetched in batches.
struct ComListing {
    ids: BatchedIds<NextIds>,
    properties: IPortableDeviceProperties,
    keys: IPortableDeviceKeyCollection,
}

impl ComListing {
    fn describe(&self, id: String) -> RawEntry {
        let id_wide = wide(&id);
        let values = match unsafe { self.properties.GetValues(PCWSTR(id_wide.as_ptr()), &self.keys) } {
            Ok(values) => values,
            Err(e) => {
                warn!("Cannot read properties of WPD object {}: {}", id, e);
                return RawEntry {
                    name: id.clone(),
                    kind: ContentKind::Undefined,
                    size: None,
                    modified: None,
                    id: ObjectId::Object(id),
                };
            }
        };

        let name = string_value(&values, &WPD_OBJECT_ORIGINAL_FILE_NAME)
            .or_else(|| string_value(&values, &WPD_OBJECT_NAME))
            .unwrap_or_else(|| id.clone());
        let kind = kind_of(unsafe { values.GetGuidValue(&WPD_OBJECT_CONTENT_TYPE) }.ok());
        let size = match kind {
            ContentKind::File => unsafe { values.GetUnsignedLargeIntegerValue(&WPD_OBJECT_SIZE) }.ok(),
            _ => None,
        };
        let modified = unsafe { values.GetValue(&WPD_OBJECT_DATE_MODIFIED) }
            .ok()
            .and_then(|variant| f64::try_from(&variant).ok())
            .and_then(ole_date_to_utc);

        RawEntry {
            name,
            kind,
            size,
            modified,
            id: ObjectId::Object(id),
        }
    }
}

impl Iterator for ComListing {
    type Item = Result<RawEntry, AccessError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.ids.next()? {
            Ok(id) => Some(Ok(self.describe(id))),
            Err(e) => Some(Err(e)),
        }
    }
}

struct StreamReader<'a>(&'a IStream);

impl Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut read: u32 = 0;
        unsafe { self.0.Read(buf.as_mut_ptr().cast(), buf.len() as u32, Some(&mut read)) }
            .ok()
            .map_err(io::Error::other)?;
        Ok(read as usize)
    }
}

struct StreamWriter<'a>(&'a IStream);

impl Write for StreamWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut written: u32 = 0;
        unsafe { self.0.Write(buf.as_ptr().cast(), buf.len() as u32, Some(&mut written)) }
            .ok()
            .map_err(io::Error::other)?;
        Ok(written as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_com_released_only_on_the_initializing_thread() {
        let mut backend = ComBackend::new(4096);
        assert!(!backend.release_com_on(thread::current().id()));

        backend.com_thread = Some(thread::current().id());
        assert!(backend.release_com_on(thread::current().id()));
        assert!(!backend.release_com_on(thread::current().id()));

        let other = thread::spawn(|| thread::current().id()).join().unwrap();
        backend.com_thread = Some(thread::current().id());
        assert!(!backend.release_com_on(other));
        assert!(backend.com_thread.is_none());
    }

    #[test]
    fn test_kind_from_content_type() {
        assert_eq!(kind_of(Some(CONTENT_TYPE_FOLDER)), ContentKind::Directory);
        assert_eq!(kind_of(Some(CONTENT_TYPE_FUNCTIONAL_OBJECT)), ContentKind::Storage);
        assert_eq!(kind_of(Some(CONTENT_TYPE_GENERIC_FILE)), ContentKind::File);
        assert_eq!(kind_of(None), ContentKind::Undefined);
    }

    #[test]
    fn test_ole_date_conversion() {
        assert_eq!(ole_date_to_utc(OLE_UNIX_EPOCH_DAYS).map(|d| d.timestamp()), Some(0));
        assert_eq!(ole_date_to_utc(OLE_UNIX_EPOCH_DAYS + 1.5).map(|d| d.timestamp()), Some(129_600));
        assert_eq!(ole_date_to_utc(f64::NAN), None);
    }

    #[test]
    fn test_wide_is_nul_terminated() {
        assert_eq!(wide("AB"), vec![65, 66, 0]);
    }
}
