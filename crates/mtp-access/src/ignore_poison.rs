//! `Mutex` locking that shrugs off poisoning.
//!
//! Sessions keep small pieces of state behind a mutex (an open device handle, a closed flag,
//! a fake device tree). A panic while one of them is held leaves the value usable, so the
//! poison flag carries no information here.

use std::sync::{Mutex, MutexGuard};

#[cfg_attr(
    not(any(test, feature = "virtual-device", target_os = "macos", target_os = "linux")),
    allow(dead_code)
)]
pub(crate) trait IgnorePoison<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnorePoison<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}
