//! Daemon lifecycle (C6): listener bootstrap, the signal-interruptible
//! accept loop, and per-connection thread spawning. See spec.md §4.6.

use std::io;
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use socket2::{Domain, Socket, Type};

use crate::config::{Bind, Config};
use crate::error::BindError;
use crate::session;
use crate::signal::ShutdownFlag;
use crate::store;

/// Listen backlog for both Unix and TCP listeners.
const BACKLOG: i32 = 128;

/// How long `accept()` blocks before re-checking the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(250);

enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

/// Bind the configured listener, performing the spec.md §4.6 startup
/// sequence first: create `base_dir`, quarantine any leftovers from an
/// unclean prior exit, then bind.
pub fn run(config: Config, shutdown: ShutdownFlag) -> Result<(), BindError> {
    store::init_base(&config.base_dir).map_err(|source| BindError::BaseDir {
        path: config.base_dir.clone(),
        source: io::Error::other(source),
    })?;
    if let Err(err) = store::quarantine_leftovers(&config.base_dir) {
        tracing::warn!(error = %err, "failed to quarantine leftover mirror directories");
    }

    let listener = bind_listener(&config.bind)?;
    tracing::info!(bind = ?config.bind, "listening");

    let socket_path = match &config.bind {
        Bind::UnixSocket { path } => Some(path.clone()),
        Bind::Tcp { .. } => None,
    };

    let config = Arc::new(config);
    accept_loop(listener, config, shutdown);

    if let Some(path) = socket_path {
        if let Err(err) = std::fs::remove_file(&path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove socket file on shutdown");
            }
        }
    }

    Ok(())
}

fn bind_listener(bind: &Bind) -> Result<Listener, BindError> {
    match bind {
        Bind::UnixSocket { path } => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| BindError::BaseDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }

            if path.exists() {
                std::fs::remove_file(path).map_err(|source| BindError::StaleSocket {
                    path: path.clone(),
                    source,
                })?;
            }

            let listener = UnixListener::bind(path).map_err(BindError::Listen)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(metadata) = std::fs::metadata(path) {
                    let mut perms = metadata.permissions();
                    perms.set_mode(0o600);
                    let _ = std::fs::set_permissions(path, perms);
                }
            }

            Ok(Listener::Unix(listener))
        }
        Bind::Tcp { ip, port } => {
            let domain = if ip.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
            let socket = Socket::new(domain, Type::STREAM, None).map_err(BindError::Listen)?;
            socket.set_reuse_address(true).map_err(BindError::Listen)?;
            let addr = std::net::SocketAddr::new(*ip, *port).into();
            socket.bind(&addr).map_err(BindError::Listen)?;
            socket.listen(BACKLOG).map_err(BindError::Listen)?;
            socket.set_nonblocking(true).map_err(BindError::Listen)?;
            Ok(Listener::Tcp(socket.into()))
        }
    }
}

fn accept_loop(listener: Listener, config: Arc<Config>, shutdown: ShutdownFlag) {
    match listener {
        Listener::Unix(listener) => {
            let _ = listener.set_nonblocking(true);
            loop {
                if shutdown.is_set() {
                    tracing::info!("shutdown signal received; accept loop exiting");
                    break;
                }
                match listener.accept() {
                    Ok((stream, addr)) => {
                        let config = Arc::clone(&config);
                        let peer = describe_unix_peer(&addr);
                        spawn_session(move || session::run_connection(stream, config, peer));
                    }
                    Err(err) if would_block_or_interrupted(&err) => {
                        thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                    }
                }
            }
        }
        Listener::Tcp(listener) => loop {
            if shutdown.is_set() {
                tracing::info!("shutdown signal received; accept loop exiting");
                break;
            }
            match listener.accept() {
                Ok((stream, addr)) => {
                    let config = Arc::clone(&config);
                    spawn_session(move || session::run_connection(stream, config, addr.to_string()));
                }
                Err(err) if would_block_or_interrupted(&err) => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                }
            }
        },
    }
}

/// Render a Unix peer address for the per-connection span (spec.md §10):
/// the bound pathname if the client's socket has one, else a placeholder
/// (client sockets accepted this way are almost always unnamed).
fn describe_unix_peer(addr: &std::os::unix::net::SocketAddr) -> String {
    match addr.as_pathname() {
        Some(path) => path.display().to_string(),
        None => "unix:unnamed".to_string(),
    }
}

fn would_block_or_interrupted(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Run `body` on a detached thread, isolating a panicking session from the
/// rest of the daemon the same way the accept loop isolates connection
/// errors.
fn spawn_session<F>(body: F)
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(move || {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(body)).is_err() {
            tracing::error!("session thread panicked; connection dropped");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_and_interrupted_are_recognized() {
        assert!(would_block_or_interrupted(&io::Error::from(
            io::ErrorKind::WouldBlock
        )));
        assert!(would_block_or_interrupted(&io::Error::from(
            io::ErrorKind::Interrupted
        )));
        assert!(!would_block_or_interrupted(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
    }

    #[test]
    fn unix_peer_without_a_pathname_falls_back_to_placeholder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind");

        let _client = std::os::unix::net::UnixStream::connect(&socket_path).expect("connect");
        let (_server, addr) = listener.accept().expect("accept");

        // A connecting client's socket is unnamed; only the listener side
        // has a bound pathname.
        assert_eq!(describe_unix_peer(&addr), "unix:unnamed");
    }
}
