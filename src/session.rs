//! Session orchestrator (C5): the per-connection state machine tying the
//! protocol codec (C1), temp-file store (C2), file watcher (C3), and editor
//! launcher (C4) together. See spec.md §4.5.

use std::io::{BufReader, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crate::config::Config;
use crate::editor;
use crate::protocol::{self, Command, OpenRequest};
use crate::store;
use crate::watcher::{self, Watcher};

/// The greeting line's version string, taken from the crate's own version.
pub const GREETING_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Anything the session can write `save`/`close` frames to, from more than
/// one thread. Every write goes through the mutex, per spec.md §5.
struct SharedWriter<W> {
    inner: Mutex<W>,
}

impl<W: Write> SharedWriter<W> {
    fn write_save(&self, token: &str, bytes: &[u8]) {
        let mut guard = self.inner.lock().expect("writer mutex poisoned");
        if let Err(err) = protocol::write_save(&mut *guard, token, bytes) {
            tracing::warn!(token, error = %err, "failed to write save frame");
        }
    }

    fn write_close(&self, token: &str) {
        let mut guard = self.inner.lock().expect("writer mutex poisoned");
        if let Err(err) = protocol::write_close(&mut *guard, token) {
            tracing::warn!(token, error = %err, "failed to write close frame");
        }
    }

    fn write_greeting(&self) {
        let mut guard = self.inner.lock().expect("writer mutex poisoned");
        let _ = write!(guard, "RMate Launcher {GREETING_VERSION}\n");
    }
}

/// A `(Mutex<usize>, Condvar)` pair tracking in-flight editor sessions so
/// DRAINING can block until every editor has exited and every temp file has
/// been pruned.
#[derive(Default)]
struct WaitGroup {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl WaitGroup {
    fn add(&self) {
        *self.count.lock().expect("wait-group mutex poisoned") += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock().expect("wait-group mutex poisoned");
        *count -= 1;
        if *count == 0 {
            self.cvar.notify_all();
        }
    }

    fn wait(&self) {
        let mut count = self.count.lock().expect("wait-group mutex poisoned");
        while *count > 0 {
            count = self.cvar.wait(count).expect("wait-group mutex poisoned");
        }
    }
}

/// A connection stream usable by the session orchestrator: needs a
/// `try_clone`-style duplicate so reads and writes can run on independent
/// handles backed by the same underlying socket.
pub trait ConnStream: Read + Write + Send + 'static {
    /// Duplicate this stream, yielding an independent handle to the same
    /// underlying connection.
    fn try_clone_conn(&self) -> std::io::Result<Self>
    where
        Self: Sized;
}

impl ConnStream for std::os::unix::net::UnixStream {
    fn try_clone_conn(&self) -> std::io::Result<Self> {
        self.try_clone()
    }
}

impl ConnStream for std::net::TcpStream {
    fn try_clone_conn(&self) -> std::io::Result<Self> {
        self.try_clone()
    }
}

/// Drive one accepted connection end to end: ACCEPTED → PARSING →
/// (OPEN_HANDLING per request) → DRAINING → CLOSED.
///
/// Every accepted connection gets a `tracing::info_span!("session", peer)`
/// (spec.md §10's ambient-stack commitment) so log lines from this
/// connection's parsing loop and its per-open editor/watcher threads are
/// attributable even with many sessions running concurrently.
pub fn run_connection<S: ConnStream>(stream: S, config: Arc<Config>, peer: String) {
    let span = tracing::info_span!("session", peer = %peer);
    let _entered = span.enter();

    let writer_stream = match stream.try_clone_conn() {
        Ok(clone) => clone,
        Err(err) => {
            tracing::error!(error = %err, "failed to clone connection for writing");
            return;
        }
    };

    let writer = Arc::new(SharedWriter {
        inner: Mutex::new(writer_stream),
    });
    writer.write_greeting();

    let wait_group = Arc::new(WaitGroup::default());
    let mut reader = BufReader::new(stream);

    loop {
        match protocol::read_command(&mut reader) {
            Ok(Some(Command::Open(request))) => {
                handle_open(request, &config, &writer, &wait_group, &span);
            }
            Ok(None) => break,
            Err(err) => {
                tracing::error!(error = %err, "protocol error; draining in-flight sessions");
                break;
            }
        }
    }

    // DRAINING: all submitted opens must finish (editor exits, watcher
    // joined, close written, temp file pruned) before the socket closes.
    wait_group.wait();
}

fn handle_open<W: Write + Send + 'static>(
    request: OpenRequest,
    config: &Arc<Config>,
    writer: &Arc<SharedWriter<W>>,
    wait_group: &Arc<WaitGroup>,
    span: &tracing::Span,
) {
    let host = host_from_display_name(&request.display_name);
    let temp_path = match store::create_mirror(&config.base_dir, &host, &request.real_path) {
        Ok(path) => path,
        Err(err) => {
            tracing::warn!(token = %request.token, error = %err, "failed to create mirror path");
            writer.write_close(&request.token);
            return;
        }
    };

    let initial_data = request.data.clone().unwrap_or_default();
    if let Err(err) = store::write_exclusive(&temp_path, &initial_data) {
        // Duplicate suppression: whichever open loses the O_EXCL race
        // immediately closes and abandons the request (spec.md §4.5).
        tracing::info!(token = %request.token, path = %temp_path.display(), error = %err, "open lost the create race or failed; closing");
        writer.write_close(&request.token);
        return;
    }

    let watcher_handle: Option<Box<dyn Watcher>> = if request.data_on_save {
        let callback_writer = Arc::clone(writer);
        let callback_path = temp_path.clone();
        let token = request.token.clone();
        let callback_span = span.clone();
        let callback: watcher::Callback = Arc::new(move |_path: &Path| {
            // Watcher callback: read-then-send under the writer mutex,
            // idempotent against duplicate/coalesced OS events. Entered
            // here (not just at thread spawn) because the watcher thread
            // itself, not this session, owns the callback's lifetime.
            let _entered = callback_span.enter();
            match store::read_all(&callback_path) {
                Ok(contents) => callback_writer.write_save(&token, &contents),
                Err(err) => {
                    tracing::warn!(token, error = %err, "failed to read mirror file after change notification");
                }
            }
        });

        match watcher::spawn(&temp_path, callback) {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(token = %request.token, error = %err, "failed to start watcher");
                let _ = store::prune(&config.base_dir, &temp_path);
                writer.write_close(&request.token);
                return;
            }
        }
    } else {
        None
    };

    wait_group.add();

    let editor_command = config.editor_command.clone();
    let base_dir = config.base_dir.clone();
    let token = request.token.clone();
    let writer = Arc::clone(writer);
    let wait_group = Arc::clone(wait_group);
    let temp_path_for_thread = temp_path.clone();
    let span = span.clone();

    thread::spawn(move || {
        // `Span`s don't follow a thread spawn automatically; entering the
        // connection's span here keeps this editor thread's log lines
        // attributed to the same session as the parsing loop's.
        let _entered = span.enter();

        // A panicking editor or watcher-stop must not take the whole
        // connection down; isolate it to this one file's lifecycle, the
        // same way the teacher's accept loop isolates a single session's
        // failure with `catch_unwind`.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            editor::run_blocking(&editor_command, &temp_path_for_thread)
        }));

        if let Err(payload) = &result {
            tracing::error!(token, panic = ?panic_message(payload), "editor thread panicked");
        } else if let Ok(Err(err)) = &result {
            tracing::warn!(token, error = %err, "failed to launch editor");
        }

        // The watcher must be stopped (its thread joined) before the
        // close frame is written, so no save for this token can follow its
        // close (spec.md §5's ordering guarantee).
        if let Some(handle) = watcher_handle {
            handle.stop();
        }

        writer.write_close(&token);
        let _ = store::prune(&base_dir, &temp_path_for_thread);
        wait_group.done();
    });
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Extract the host component from a client-supplied `display_name` of the
/// form `"host:path"`, falling back to the whole string when there is no
/// colon (an arbitrary label).
fn host_from_display_name(display_name: &str) -> String {
    match display_name.split_once(':') {
        Some((host, _)) => host.to_string(),
        None => display_name.to_string(),
    }
}
