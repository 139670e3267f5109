//! Backend selection and transfer tunables.

use log::warn;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default transfer block size when the backend gives no advice (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Default bound on a single protocol call (some devices are slow).
pub const DEFAULT_PROTOCOL_TIMEOUT_SECS: u64 = 30;

/// Which backend a [`crate::BackendContext`] should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// COM/WPD on Windows, otherwise the mount if the mount root exists, otherwise the protocol library.
    #[default]
    Auto,
    Com,
    Mount,
    Protocol,
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "com" | "wpd" => Ok(Self::Com),
            "mount" | "gvfs" => Ok(Self::Mount),
            "protocol" | "libmtp" | "mtp" => Ok(Self::Protocol),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Configuration for device access.
/// Priority: environment variables > defaults
#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub backend: BackendPreference,
    /// Directory holding the per-device mount folders. `None` means `/run/user/<uid>/gvfs`.
    pub mount_root: Option<PathBuf>,
    /// Kill other processes holding MTP-mode USB devices before the protocol backend opens them.
    pub evict_bus_users: bool,
    /// Chunk size for streamed transfers when the backend has no preferred size.
    pub block_size: usize,
    /// Upper bound on a single protocol-library call.
    pub protocol_timeout: Duration,
}

impl AccessConfig {
    /// Defaults overridden by `MTP_ACCESS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let backend = lookup("MTP_ACCESS_BACKEND")
            .and_then(|v| {
                v.parse()
                    .map_err(|e| warn!("Ignoring MTP_ACCESS_BACKEND: {}", e))
                    .ok()
            })
            .unwrap_or(defaults.backend);

        let mount_root = lookup("MTP_ACCESS_MOUNT_ROOT")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or(defaults.mount_root);

        let evict_bus_users = lookup("MTP_ACCESS_EVICT_BUS_USERS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.evict_bus_users);

        let block_size = lookup("MTP_ACCESS_BLOCK_SIZE")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&size| size > 0)
            .unwrap_or(defaults.block_size);

        let protocol_timeout = lookup("MTP_ACCESS_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.protocol_timeout);

        Self {
            backend,
            mount_root,
            evict_bus_users,
            block_size,
            protocol_timeout,
        }
    }

    /// The mount root to scan: the configured one, or the current user's gvfs directory.
    pub fn resolved_mount_root(&self) -> Option<PathBuf> {
        self.mount_root.clone().or_else(default_mount_root)
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            mount_root: None,
            evict_bus_users: false,
            block_size: DEFAULT_BLOCK_SIZE,
            protocol_timeout: Duration::from_secs(DEFAULT_PROTOCOL_TIMEOUT_SECS),
        }
    }
}

#[cfg(unix)]
fn default_mount_root() -> Option<PathBuf> {
    Some(PathBuf::from(format!("/run/user/{}/gvfs", uzers::get_current_uid())))
}

#[cfg(not(unix))]
fn default_mount_root() -> Option<PathBuf> {
    None
}
