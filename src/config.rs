//! Link configuration.
//!
//! Settings are resolved in layers: built-in defaults, then an optional JSON
//! file, then environment variables.
//!
//! | Variable             | Field           |
//! |----------------------|-----------------|
//! | `ZDDE_CONFIG`        | config file path |
//! | `ZDDE_TIMEOUT`       | `timeout_secs`  |
//! | `ZDDE_SOCKET_DIR`    | `socket_dir`    |
//! | `ZDDE_BASE_NAME`     | `base_name`     |
//! | `ZDDE_TEXT_ENCODING` | `text_encoding` |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::ipc::registry::PeerName;

/// Default per-handle request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 50.0;

/// Name the first peer instance answers to.
pub const DEFAULT_BASE_NAME: &str = "ZEMAX";

/// Name the client announces during the handshake.
pub const DEFAULT_CLIENT_NAME: &str = "ZCLIENT";

/// Text encoding used for command strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    /// Commands must be plain ASCII.
    #[default]
    Ascii,
    /// Commands may carry any UTF-8 text.
    Unicode,
}

impl TextEncoding {
    /// Check that a command can be sent under this encoding.
    pub fn check(&self, command: &str) -> Result<(), LinkError> {
        match self {
            TextEncoding::Ascii if !command.is_ascii() => Err(LinkError::InvalidArgument(
                format!("command is not ASCII: {:?}", command),
            )),
            _ => Ok(()),
        }
    }
}

impl FromStr for TextEncoding {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ascii" => Ok(TextEncoding::Ascii),
            "unicode" | "utf8" | "utf-8" => Ok(TextEncoding::Unicode),
            other => Err(LinkError::Config(format!(
                "unknown text encoding '{}' (expected ascii or unicode)",
                other
            ))),
        }
    }
}

/// Configuration for the channel registry and the socket transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Base peer name; further instances append an index ("ZEMAX1").
    pub base_name: String,
    /// Name announced to the peer during the handshake.
    pub client_name: String,
    /// Default timeout for every request on a new handle.
    pub timeout_secs: f64,
    /// Directory holding the peers' sockets. Resolved at runtime when unset.
    pub socket_dir: Option<PathBuf>,
    /// Encoding of command strings.
    pub text_encoding: TextEncoding,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_name: DEFAULT_BASE_NAME.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            socket_dir: None,
            text_encoding: TextEncoding::default(),
        }
    }
}

impl LinkConfig {
    /// Load configuration from the default file location and the environment.
    ///
    /// Search order for the file:
    ///
    /// 1. `ZDDE_CONFIG` environment variable
    /// 2. `<config_dir>/zdde/config.json`
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: LinkConfig = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!("Loaded link configuration from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), LinkError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("ZDDE_TIMEOUT") {
            self.timeout_secs = value.trim().parse().map_err(|_| {
                LinkError::Config(format!("ZDDE_TIMEOUT is not a number: {:?}", value))
            })?;
        }
        if let Some(value) = lookup("ZDDE_SOCKET_DIR") {
            self.socket_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("ZDDE_BASE_NAME") {
            self.base_name = value;
        }
        if let Some(value) = lookup("ZDDE_TEXT_ENCODING") {
            self.text_encoding = value.parse()?;
        }
        Ok(())
    }

    /// Reject settings the link cannot work with.
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.timeout_secs <= 0.0 || Duration::try_from_secs_f64(self.timeout_secs).is_err() {
            return Err(LinkError::Config(format!(
                "timeout must be a positive number of seconds, got {}",
                self.timeout_secs
            )));
        }
        validate_name("base_name", &self.base_name)?;
        validate_name("client_name", &self.client_name)?;
        Ok(())
    }

    /// Default request timeout as a `Duration`.
    ///
    /// Values [`validate`](Self::validate) would reject fall back to
    /// [`DEFAULT_TIMEOUT_SECS`].
    pub fn timeout(&self) -> Duration {
        match Duration::try_from_secs_f64(self.timeout_secs) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Directory holding the peers' sockets.
    ///
    /// Resolution order:
    /// 1. `socket_dir` from the configuration
    /// 2. `$XDG_RUNTIME_DIR` (Linux standard, per-user)
    /// 3. The platform cache directory (`~/Library/Caches` on macOS)
    /// 4. `/tmp` (fallback)
    pub fn resolved_socket_dir(&self) -> PathBuf {
        if let Some(dir) = &self.socket_dir {
            return dir.clone();
        }

        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            return PathBuf::from(runtime_dir);
        }

        if let Some(cache_dir) = dirs::cache_dir() {
            return cache_dir;
        }

        PathBuf::from("/tmp")
    }

    /// Socket path a given peer listens on.
    pub fn socket_path(&self, peer: &PeerName) -> PathBuf {
        self.resolved_socket_dir()
            .join(format!("{}.sock", peer.as_str()))
    }
}

fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("ZDDE_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("zdde").join("config.json"))
}

fn validate_name(field: &str, name: &str) -> Result<(), LinkError> {
    if name.is_empty() {
        return Err(LinkError::Config(format!("{} must not be empty", field)));
    }
    if name.contains(['/', '\\', ',']) || name.chars().any(char::is_control) {
        return Err(LinkError::Config(format!(
            "{} contains a reserved character: {:?}",
            field, name
        )));
    }
    Ok(())
}
