//! Linux inotify backend for the file watcher (C3). See spec.md §4.3.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};

use super::{Callback, Watcher};
use crate::error::WatcherError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const WATCH_MASK: AddWatchFlags = AddWatchFlags::from_bits_truncate(
    AddWatchFlags::IN_MODIFY.bits()
        | AddWatchFlags::IN_ATTRIB.bits()
        | AddWatchFlags::IN_CLOSE_WRITE.bits()
        | AddWatchFlags::IN_MOVED_FROM.bits()
        | AddWatchFlags::IN_MOVED_TO.bits()
        | AddWatchFlags::IN_CREATE.bits()
        | AddWatchFlags::IN_DELETE.bits(),
);

pub struct InotifyWatcher {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub fn spawn(path: PathBuf, callback: Callback) -> Result<Box<dyn Watcher>, WatcherError> {
    let inotify =
        Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC).map_err(|errno| {
            WatcherError::Register {
                path: path.clone(),
                source: std::io::Error::from(errno),
            }
        })?;

    let wd = inotify
        .add_watch(&path, WATCH_MASK)
        .map_err(|errno| WatcherError::Register {
            path: path.clone(),
            source: std::io::Error::from(errno),
        })?;

    let should_stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&should_stop);

    let handle = thread::spawn(move || {
        run_loop(&inotify, &thread_stop, &path, &callback);
        // Stop semantics: the fd is only ever touched from this thread, and
        // only after the loop observes `should_stop`, so closing here can
        // never race a callback still in flight.
        let _ = inotify.rm_watch(wd);
        drop(inotify);
    });

    Ok(Box::new(InotifyWatcher {
        should_stop,
        handle: Some(handle),
    }))
}

fn run_loop(inotify: &Inotify, should_stop: &AtomicBool, path: &std::path::Path, callback: &Callback) {
    while !should_stop.load(Ordering::SeqCst) {
        match inotify.read_events() {
            Ok(events) => {
                for event in events {
                    if event.mask.intersects(WATCH_MASK) {
                        callback(path);
                    }
                }
            }
            Err(Errno::EAGAIN) | Err(Errno::EWOULDBLOCK) => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(errno) => {
                tracing::warn!(path = %path.display(), error = %errno, "inotify read failed");
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

impl Watcher for InotifyWatcher {
    /// Idempotent: the second call finds `handle` already taken and simply
    /// re-sets the already-true flag.
    fn stop(mut self: Box<Self>) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
