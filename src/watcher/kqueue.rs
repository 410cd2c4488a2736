//! BSD/macOS kqueue backend for the file watcher (C3). See spec.md §4.3.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sys::event::{EventFilter, EventFlag, FilterFlag, KEvent, Kqueue};

use super::{Callback, Watcher};
use crate::error::WatcherError;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub struct KqueueWatcher {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub fn spawn(path: PathBuf, callback: Callback) -> Result<Box<dyn Watcher>, WatcherError> {
    let file = File::open(&path).map_err(|source| WatcherError::Register {
        path: path.clone(),
        source,
    })?;

    let kq = Kqueue::new().map_err(|errno| WatcherError::Register {
        path: path.clone(),
        source: std::io::Error::from(errno),
    })?;

    let event = KEvent::new(
        file.as_raw_fd() as usize,
        EventFilter::EVFILT_VNODE,
        EventFlag::EV_ADD | EventFlag::EV_ENABLE | EventFlag::EV_CLEAR,
        FilterFlag::NOTE_WRITE | FilterFlag::NOTE_EXTEND | FilterFlag::NOTE_ATTRIB,
        0,
        0,
    );

    kq.kevent(&[event], &mut [], None)
        .map_err(|errno| WatcherError::Register {
            path: path.clone(),
            source: std::io::Error::from(errno),
        })?;

    let should_stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&should_stop);

    let handle = thread::spawn(move || {
        // `file` and `kq` are owned by this thread for its whole lifetime;
        // they are dropped only after the loop observes `should_stop`, so
        // stopping can never race a callback still reading the fd.
        run_loop(&kq, &file, &thread_stop, &path, &callback);
        drop(kq);
        drop(file);
    });

    Ok(Box::new(KqueueWatcher {
        should_stop,
        handle: Some(handle),
    }))
}

fn run_loop(kq: &Kqueue, file: &File, should_stop: &AtomicBool, path: &std::path::Path, callback: &Callback) {
    let mut events = [KEvent::new(
        0,
        EventFilter::EVFILT_VNODE,
        EventFlag::empty(),
        FilterFlag::empty(),
        0,
        0,
    )];

    while !should_stop.load(Ordering::SeqCst) {
        match kq.kevent(&[], &mut events, Some(POLL_TIMEOUT)) {
            Ok(0) => continue,
            Ok(_) => {
                let _ = file;
                callback(path);
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(errno) => {
                tracing::warn!(path = %path.display(), error = %errno, "kevent wait failed");
                thread::sleep(POLL_TIMEOUT);
            }
        }
    }
}

impl Watcher for KqueueWatcher {
    fn stop(mut self: Box<Self>) {
        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
