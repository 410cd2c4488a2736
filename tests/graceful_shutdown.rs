//! S5: SIGTERM/shutdown-flag mid-session. The accept loop stops taking new
//! connections as soon as the flag is observed, while an already-accepted
//! session is not cancelled — its editor keeps running and the session
//! still emits a final `close` once it exits.

mod common;

use std::io::BufReader;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

#[test]
fn shutdown_stops_new_connections_but_lets_in_flight_session_finish() {
    let root = tempfile::tempdir().expect("tempdir");
    // Long enough to still be sleeping well after shutdown is requested.
    let editor = common::write_script(root.path(), "editor.sh", "sleep 0.6\nexit 0\n");

    let (daemon, _guard) = common::start_daemon(&editor.display().to_string());

    let mut client = daemon.connect();
    let mut reader = BufReader::new(client.try_clone().expect("clone"));

    common::send_open(&mut client, "T5", "/etc/hosts", b"data", false);
    common::send_terminator(&mut client);

    // Request shutdown while the editor is still sleeping; this only sets
    // the flag, it does not wait for anything.
    daemon.request_shutdown();

    // The accept loop polls the flag between accept() calls; wait for it
    // to notice, exit, and remove its socket file.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if !daemon.socket_path.exists() {
            break;
        }
        if Instant::now() > deadline {
            panic!("socket file was never removed after shutdown was requested");
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    // No new connections are accepted once the accept loop has exited.
    assert!(UnixStream::connect(&daemon.socket_path).is_err());

    // The session that was already in flight when shutdown was requested
    // is not cancelled: its editor keeps running and the session still
    // drains to completion, emitting its close frame.
    let (command, token, _payload) = common::read_frame(&mut reader);
    assert_eq!(command, "close");
    assert_eq!(token, "T5");

    // Give pruning a moment to run after the close frame is written.
    std::thread::sleep(Duration::from_millis(100));
    assert!(!daemon.base_dir.join("test-host/etc/hosts").exists());

    // The accept loop has already exited by this point; joining is
    // effectively instantaneous.
    daemon.shutdown_and_join();
}
