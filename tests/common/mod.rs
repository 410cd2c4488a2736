//! Shared end-to-end test scaffolding: spins up a real daemon on a Unix
//! socket in a temp directory with a scripted stand-in "editor".

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rmate_launcher::config::{Bind, Config};
use rmate_launcher::error::BindError;
use rmate_launcher::signal::{self, ShutdownFlag};

/// A running daemon bound to a Unix socket, plus the means to connect to it
/// and to ask it to shut down.
pub struct TestDaemon {
    pub socket_path: PathBuf,
    pub base_dir: PathBuf,
    shutdown: ShutdownFlag,
    handle: Option<JoinHandle<Result<(), BindError>>>,
}

impl TestDaemon {
    /// Connect a fresh client socket to the daemon, draining its greeting
    /// line first.
    pub fn connect(&self) -> UnixStream {
        let stream = connect_with_retries(&self.socket_path);
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        let mut greeting = String::new();
        reader.read_line(&mut greeting).expect("read greeting");
        assert!(greeting.starts_with("RMate Launcher"));
        stream
    }

    /// Flip the shutdown flag without waiting for anything, so a test can
    /// observe the accept loop stop taking new connections while an
    /// in-flight session keeps draining.
    pub fn request_shutdown(&self) {
        self.shutdown.request();
    }

    /// Request shutdown and wait for the accept loop to exit.
    pub fn shutdown_and_join(mut self) {
        self.shutdown.request();
        let handle = self.handle.take().expect("daemon thread");
        handle
            .join()
            .expect("daemon thread panicked")
            .expect("daemon exited with an error");
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shutdown.request();
            let _ = handle.join();
        }
    }
}

/// Write an executable shell script at `dir/name` with the given body,
/// returning its path for use as an `editor_command`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod");
    path
}

/// Start a daemon listening on a Unix socket under a fresh temp base
/// directory, using `editor_command` as the (already-executable) editor.
pub fn start_daemon(editor_command: &str) -> (TestDaemon, tempfile::TempDir) {
    let root = tempfile::tempdir().expect("tempdir");
    let base_dir = root.path().join("mirror");
    let socket_path = root.path().join("rmate.sock");

    let config = Config {
        editor_command: editor_command.to_string(),
        bind: Bind::UnixSocket {
            path: socket_path.clone(),
        },
        base_dir: base_dir.clone(),
    };

    let shutdown = signal::install_signal_handlers().expect("install signal handlers");
    let thread_shutdown = shutdown.clone();

    let handle = thread::spawn(move || rmate_launcher::daemon::run(config, thread_shutdown));

    wait_for_socket(&socket_path);

    (
        TestDaemon {
            socket_path,
            base_dir,
            shutdown,
            handle: Some(handle),
        },
        root,
    )
}

fn wait_for_socket(path: &Path) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !path.exists() {
        if std::time::Instant::now() > deadline {
            panic!("daemon never created socket at {}", path.display());
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn connect_with_retries(path: &Path) -> UnixStream {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => return stream,
            Err(err) => {
                if std::time::Instant::now() > deadline {
                    panic!("failed to connect to {}: {err}", path.display());
                }
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

/// Send a raw `open` command, identical to what a real client writes on
/// the wire.
pub fn send_open(stream: &mut UnixStream, token: &str, real_path: &str, data: &[u8], data_on_save: bool) {
    write!(
        stream,
        "open\ndisplay-name: test-host:{real_path}\nreal-path: {real_path}\ntoken: {token}\ndata-on-save: {}\ndata: {}\n",
        if data_on_save { "yes" } else { "no" },
        data.len()
    )
    .expect("write open header");
    stream.write_all(data).expect("write open payload");
    stream.write_all(b"\n").expect("write open payload terminator");
}

/// Terminate the command stream with the `.` sentinel line.
pub fn send_terminator(stream: &mut UnixStream) {
    stream.write_all(b".\n").expect("write terminator");
}

/// Read one `save` or `close` frame from the daemon, returning
/// `(command, token, payload)`. `payload` is empty for `close`.
pub fn read_frame(reader: &mut BufReader<UnixStream>) -> (String, String, Vec<u8>) {
    let mut command = String::new();
    reader.read_line(&mut command).expect("read command line");
    let command = command.trim_end().to_string();

    let mut token_line = String::new();
    reader.read_line(&mut token_line).expect("read token line");
    let token = token_line
        .trim_end()
        .strip_prefix("token: ")
        .expect("token line")
        .to_string();

    if command == "close" {
        let mut blank = String::new();
        reader.read_line(&mut blank).expect("read blank line");
        return (command, token, Vec::new());
    }

    let mut data_line = String::new();
    reader.read_line(&mut data_line).expect("read data line");
    let n: usize = data_line
        .trim_end()
        .strip_prefix("data: ")
        .expect("data line")
        .parse()
        .expect("data length");

    let mut payload = vec![0u8; n];
    std::io::Read::read_exact(reader, &mut payload).expect("read payload");
    let mut terminator = [0u8; 1];
    std::io::Read::read_exact(reader, &mut terminator).expect("read terminator");

    (command, token, payload)
}
