//! File watcher (C3): reports modifications to one file using the
//! OS-native mechanism. See spec.md §4.3.
//!
//! Exactly one backend is compiled per target: kqueue on BSD/macOS,
//! inotify on Linux. Unsupported targets fail to compile rather than
//! silently degrading, per spec.md §9's design note.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::WatcherError;

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
#[cfg(target_os = "linux")]
mod inotify;

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
compile_error!("rmate-launcher's file watcher has no backend for this target (only Linux/inotify and BSD-family/kqueue are supported)");

/// Callback invoked sequentially, never concurrently, on every reported
/// content-modifying event.
pub type Callback = Arc<dyn Fn(&Path) + Send + Sync>;

/// A running per-file watch. Dropping a handle does not stop the watch;
/// call [`Watcher::stop`] explicitly so stop semantics stay deterministic.
pub trait Watcher: Send {
    /// Stop the watch, joining its background thread before returning.
    /// Idempotent: calling `stop` more than once is a no-op after the
    /// first call.
    fn stop(self: Box<Self>);
}

/// Start a background thread watching `path`, invoking `callback` on every
/// reported modification.
pub fn spawn(path: &Path, callback: Callback) -> Result<Box<dyn Watcher>, WatcherError> {
    platform::spawn(path.to_path_buf(), callback)
}

#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
use kqueue as platform;

#[cfg(target_os = "linux")]
use inotify as platform;
