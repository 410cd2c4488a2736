//! Daemon configuration, assembled once at startup from the environment.
//!
//! See spec.md §3 (`Config`) and §6 (environment variables, mode selection).

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Default TCP port (`RMATE_PORT`), matching upstream `rmate`'s default.
pub const DEFAULT_PORT: u16 = 52698;

/// Default TCP bind address (`RMATE_IP`).
pub const DEFAULT_IP: &str = "127.0.0.1";

/// How the daemon listens for incoming connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bind {
    /// Listen on a Unix domain socket at the given path.
    UnixSocket {
        /// Absolute path of the socket file.
        path: PathBuf,
    },
    /// Listen on a TCP address/port.
    Tcp {
        /// Bind address.
        ip: IpAddr,
        /// Bind port.
        port: u16,
    },
}

/// Immutable, process-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shell command invoked per file; must block until editing completes.
    pub editor_command: String,
    /// How to listen for incoming connections.
    pub bind: Bind,
    /// Base directory under which mirror files live.
    pub base_dir: PathBuf,
}

impl Config {
    /// Build a `Config` from the process environment, per spec.md §6.
    pub fn from_env() -> Result<Self, ConfigError> {
        let editor_command =
            env::var("RMATE_EDITOR").map_err(|_| ConfigError::MissingEditor)?;

        let home = env::var_os("HOME").map(PathBuf::from);

        let base_dir = match env::var_os("RMATE_BASE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => home
                .clone()
                .ok_or(ConfigError::MissingHome("RMATE_BASE_DIR"))?
                .join(".rmate_launcher"),
        };

        let socket_env = env::var_os("RMATE_SOCKET");
        let ip_env = env::var("RMATE_IP").ok();
        let port_env = env::var("RMATE_PORT").ok();

        let bind = if socket_env.is_some() || (ip_env.is_none() && port_env.is_none()) {
            let path = match socket_env {
                Some(path) => PathBuf::from(path),
                None => home
                    .ok_or(ConfigError::MissingHome("RMATE_SOCKET"))?
                    .join(".rmate_launcher")
                    .join("rmate.sock"),
            };
            Bind::UnixSocket { path }
        } else {
            let ip = ip_env
                .as_deref()
                .and_then(|s| s.parse::<IpAddr>().ok())
                .unwrap_or_else(|| DEFAULT_IP.parse().expect("default IP is valid"));
            let port = port_env
                .as_deref()
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or_else(|| {
                    if port_env.is_some() {
                        tracing::warn!(
                            value = port_env.as_deref().unwrap_or_default(),
                            "RMATE_PORT failed to parse; falling back to default"
                        );
                    }
                    DEFAULT_PORT
                });
            Bind::Tcp { ip, port }
        };

        Ok(Config {
            editor_command,
            bind,
            base_dir,
        })
    }
}
