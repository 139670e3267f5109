//! The backend context: one explicit value owning the active backend's process-level state.
//!
//! A context picks exactly one backend at construction, initializes it lazily on the first
//! [`BackendContext::enumerate`], and tears it down in [`BackendContext::shutdown`]. Teardown is
//! process-level (COM uninitialization, the protocol runtime), so it is refused while any device
//! obtained from the context is still open. Closing a device only ever releases that device.

use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::backend::mount::MountBackend;
use crate::backend::{Backend, BackendKind};
use crate::config::{AccessConfig, BackendPreference};
use crate::device::Device;
use crate::enumerator::enumerate_devices;
use crate::error::AccessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextState {
    Uninitialized,
    Ready,
    ShutDown,
}

pub struct BackendContext {
    config: AccessConfig,
    backend: Box<dyn Backend>,
    state: ContextState,
    open_devices: Arc<AtomicUsize>,
}

impl BackendContext {
    /// Selects the backend named by `config.backend`.
    ///
    /// `Auto` picks COM on Windows; elsewhere the mount backend when the mount root exists,
    /// otherwise the protocol backend.
    pub fn new(config: AccessConfig) -> Result<Self, AccessError> {
        let backend = select_backend(&config)?;
        info!("Using the {} backend", backend.kind());
        Ok(Self::with_backend(config, backend))
    }

    /// [`BackendContext::new`] with [`AccessConfig::from_env`].
    pub fn from_env() -> Result<Self, AccessError> {
        Self::new(AccessConfig::from_env())
    }

    /// A mount-backend context scanning `root` for device directories.
    pub fn mount(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let config = AccessConfig {
            backend: BackendPreference::Mount,
            mount_root: Some(root.clone()),
            ..AccessConfig::default()
        };
        let backend = Box::new(MountBackend::new(root, config.block_size));
        Self::with_backend(config, backend)
    }

    /// A context over in-memory devices.
    #[cfg(any(test, feature = "virtual-device"))]
    pub fn virtual_devices(devices: Vec<crate::backend::virtual_device::VirtualDevice>) -> Self {
        let config = AccessConfig::default();
        let backend = Box::new(crate::backend::virtual_device::VirtualBackend::new(
            devices,
            config.block_size,
        ));
        Self::with_backend(config, backend)
    }

    fn with_backend(config: AccessConfig, backend: Box<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            state: ContextState::Uninitialized,
            open_devices: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ContextState::Ready
    }

    /// Devices handed out by this context and not yet closed.
    pub fn open_device_count(&self) -> usize {
        self.open_devices.load(Ordering::Acquire)
    }

    fn ensure_ready(&mut self) -> Result<(), AccessError> {
        match self.state {
            ContextState::Ready => Ok(()),
            ContextState::ShutDown => Err(AccessError::backend("backend context has been shut down")),
            ContextState::Uninitialized => {
                self.backend
                    .initialize()
                    .map_err(|e| e.context(&format!("initialize {} backend", self.backend.kind())))?;
                self.state = ContextState::Ready;
                info!("Initialized the {} backend", self.backend.kind());
                Ok(())
            }
        }
    }

    /// Lists attached devices that expose at least one storage. Initializes the backend on
    /// first use. Order is backend-defined.
    pub fn enumerate(&mut self) -> Result<Vec<Device>, AccessError> {
        self.ensure_ready()?;
        enumerate_devices(self.backend.as_mut(), &self.open_devices)
    }

    /// Kills other processes holding MTP devices on the USB bus. Destructive; only the protocol
    /// backend supports it. Returns how many devices were freed.
    pub fn evict_bus_users(&mut self) -> Result<usize, AccessError> {
        warn!("Evicting other users of MTP devices on request");
        self.backend.evict_bus_users()
    }

    /// Releases the backend. Fails while devices from this context are still open. Calling it
    /// again is a no-op, and the context cannot be used afterwards.
    pub fn shutdown(&mut self) -> Result<(), AccessError> {
        let open = self.open_device_count();
        if open > 0 {
            return Err(AccessError::backend(format!(
                "cannot shut down the {} backend: {} device(s) still open",
                self.backend.kind(),
                open
            )));
        }

        match self.state {
            ContextState::ShutDown => {
                debug!("Backend context already shut down");
                Ok(())
            }
            ContextState::Uninitialized => {
                self.state = ContextState::ShutDown;
                Ok(())
            }
            ContextState::Ready => {
                self.state = ContextState::ShutDown;
                self.backend.shutdown()?;
                info!("Shut down the {} backend", self.backend.kind());
                Ok(())
            }
        }
    }
}

impl Drop for BackendContext {
    fn drop(&mut self) {
        if self.state != ContextState::Ready {
            return;
        }
        if self.open_device_count() > 0 {
            warn!(
                "Backend context dropped with {} open device(s); leaving the {} backend up",
                self.open_device_count(),
                self.backend.kind()
            );
            return;
        }
        if let Err(e) = self.shutdown() {
            warn!("Failed to shut down the {} backend: {}", self.backend.kind(), e);
        }
    }
}

impl std::fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendContext")
            .field("backend", &self.backend.kind())
            .field("state", &self.state)
            .field("open_devices", &self.open_device_count())
            .finish()
    }
}

fn select_backend(config: &AccessConfig) -> Result<Box<dyn Backend>, AccessError> {
    match config.backend {
        BackendPreference::Com => com_backend(config),
        BackendPreference::Mount => mount_backend(config),
        BackendPreference::Protocol => protocol_backend(config),
        BackendPreference::Auto if cfg!(windows) => com_backend(config),
        BackendPreference::Auto => match config.resolved_mount_root() {
            Some(root) if root.is_dir() => {
                debug!("Mount root {} exists", root.display());
                mount_backend(config)
            }
            _ => protocol_backend(config),
        },
    }
}

fn mount_backend(config: &AccessConfig) -> Result<Box<dyn Backend>, AccessError> {
    let root = config
        .resolved_mount_root()
        .ok_or_else(|| AccessError::backend("no mount root configured for this platform"))?;
    Ok(Box::new(MountBackend::new(root, config.block_size)))
}

#[cfg(any(target_os = "macos", target_os = "linux"))]
fn protocol_backend(config: &AccessConfig) -> Result<Box<dyn Backend>, AccessError> {
    Ok(Box::new(crate::backend::protocol::ProtocolBackend::new(
        config.protocol_timeout,
        config.block_size,
        config.evict_bus_users,
    )))
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
fn protocol_backend(_config: &AccessConfig) -> Result<Box<dyn Backend>, AccessError> {
    Err(AccessError::backend("the protocol backend is not available on this platform"))
}

#[cfg(windows)]
fn com_backend(config: &AccessConfig) -> Result<Box<dyn Backend>, AccessError> {
    Ok(Box::new(crate::backend::com::ComBackend::new(config.block_size)))
}

#[cfg(not(windows))]
fn com_backend(_config: &AccessConfig) -> Result<Box<dyn Backend>, AccessError> {
    Err(AccessError::backend("the COM backend is only available on Windows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_mount_preference() {
        let config = AccessConfig {
            backend: BackendPreference::Mount,
            mount_root: Some(PathBuf::from("/nonexistent/gvfs")),
            ..AccessConfig::default()
        };
        let context = BackendContext::new(config).unwrap();
        assert_eq!(context.kind(), BackendKind::Mount);
        assert!(!context.is_initialized());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_com_unavailable_off_windows() {
        let config = AccessConfig {
            backend: BackendPreference::Com,
            ..AccessConfig::default()
        };
        assert!(BackendContext::new(config).is_err());
    }

    #[cfg(any(target_os = "macos", target_os = "linux"))]
    #[test]
    fn test_auto_falls_back_to_protocol_without_mount_root() {
        let config = AccessConfig {
            mount_root: Some(PathBuf::from("/nonexistent/gvfs")),
            ..AccessConfig::default()
        };
        let context = BackendContext::new(config).unwrap();
        assert_eq!(context.kind(), BackendKind::Protocol);
    }

    #[cfg(unix)]
    #[test]
    fn test_auto_prefers_existing_mount_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = AccessConfig {
            mount_root: Some(dir.path().to_path_buf()),
            ..AccessConfig::default()
        };
        let context = BackendContext::new(config).unwrap();
        assert_eq!(context.kind(), BackendKind::Mount);
    }

    #[test]
    fn test_missing_mount_root_fails_enumeration() {
        let mut context = BackendContext::mount("/nonexistent/gvfs");
        let err = context.enumerate().unwrap_err();
        assert!(err.to_string().contains("initialize mount backend"), "{err}");
        assert!(!context.is_initialized());
    }
}
