//! Signal-driven shutdown (part of C6). See spec.md §4.6.
//!
//! `SIGTERM`/`SIGINT` set a shared flag; the accept loop polls it between
//! `accept()` calls and the `.stop()` path never runs signal-unsafe code
//! directly inside the handler itself (`signal_hook::flag::register` only
//! ever stores to an `AtomicBool`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag set by a signal handler, polled by the accept loop.
#[derive(Clone)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    /// Returns `true` once a shutdown signal has been received.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the flag directly, as if a shutdown signal had arrived. Useful
    /// for driving shutdown programmatically (tests, supervisors) without
    /// going through the OS signal path.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Register `SIGTERM` and `SIGINT` handlers that flip the returned flag.
pub fn install_signal_handlers() -> std::io::Result<ShutdownFlag> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag))?;
    Ok(ShutdownFlag(flag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn flag_starts_unset() {
        let flag = ShutdownFlag(Arc::new(AtomicBool::new(false)));
        assert!(!flag.is_set());
    }

    #[test]
    fn flag_reports_set_after_store() {
        let inner = Arc::new(AtomicBool::new(false));
        let flag = ShutdownFlag(Arc::clone(&inner));
        inner.store(true, Ordering::SeqCst);
        assert!(flag.is_set());
    }
}
