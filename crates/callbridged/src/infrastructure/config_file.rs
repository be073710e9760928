//! TOML configuration file for the relay daemon.
//!
//! Looked up in this order unless `--config` names a file:
//!
//! 1. `$XDG_CONFIG_HOME/callbridged/callbridged.toml`
//! 2. `~/.config/callbridged/callbridged.toml`
//! 3. `/usr/local/etc/callbridged/callbridged.toml`
//!
//! ```toml
//! [relay]
//! username = "alice"
//! password = "0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33"  # sha1 hex
//! cert = "~/.config/callbridged/cert.pem"
//! key = "~/.config/callbridged/key.pem"
//! host = "0.0.0.0"
//! port = 2727
//!
//! [liveness]
//! external_ping_interval_secs = 5
//! client_ping_interval_secs = 10
//! pong_timeout_secs = 30
//! command_timeout_secs = 10
//! handshake_timeout_secs = 30
//!
//! [backend]
//! command = ["skype-api-helper", "--display", ":0"]
//! event_queue_capacity = 256
//! ```
//!
//! Every field except `username`, `password`, `cert` and `key` has a default.
//! Command-line flags override `host`, `port` and the backend.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use callbridge_core::{CredentialError, Credentials};

use crate::domain::{BackendConfig, LivenessConfig, RelayConfig, DEFAULT_PORT};

const APP_DIR: &str = "callbridged";
const FILE_NAME: &str = "callbridged.toml";
const SYSTEM_CONFIG_DIR: &str = "/usr/local/etc";

/// Fatal startup errors.  Any of these stops the daemon before it binds.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A mandatory setting is absent.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    /// A setting is present but unusable.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The username or password verifier is malformed.
    #[error("invalid credentials: {0}")]
    Credentials(#[from] CredentialError),

    /// Neither `--mock` nor `[backend] command` was given.
    #[error("no external API backend configured (use --mock or [backend] command)")]
    NoBackend,

    /// The certificate or key could not be loaded.
    #[error("TLS setup failed for {path}: {reason}")]
    Tls { path: PathBuf, reason: String },
}

// ── File schema ───────────────────────────────────────────────────────────────

/// On-disk layout of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub liveness: LivenessSection,
    #[serde(default)]
    pub backend: BackendSection,
}

/// `[relay]`: listener and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelaySection {
    pub username: Option<String>,
    /// SHA-1 hex digest of the shared secret.
    pub password: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// `[liveness]`: keepalive periods and deadlines, in whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LivenessSection {
    #[serde(default = "default_external_ping")]
    pub external_ping_interval_secs: u64,
    #[serde(default = "default_client_ping")]
    pub client_ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

/// `[backend]`: how to reach the wrapped service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendSection {
    /// Helper program and its arguments.  Empty means "not configured".
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_queue_capacity")]
    pub event_queue_capacity: usize,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_external_ping() -> u64 {
    5
}
fn default_client_ping() -> u64 {
    10
}
fn default_pong_timeout() -> u64 {
    30
}
fn default_command_timeout() -> u64 {
    10
}
fn default_handshake_timeout() -> u64 {
    30
}
fn default_queue_capacity() -> usize {
    256
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            cert: None,
            key: None,
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            external_ping_interval_secs: default_external_ping(),
            client_ping_interval_secs: default_client_ping(),
            pong_timeout_secs: default_pong_timeout(),
            command_timeout_secs: default_command_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            event_queue_capacity: default_queue_capacity(),
        }
    }
}

// ── Command-line overrides ────────────────────────────────────────────────────

/// Settings given on the command line, applied on top of the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Transcript for the scripted backend; wins over `[backend] command`.
    pub mock: Option<PathBuf>,
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Reads and parses a configuration file.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`] if
/// it is not valid.
pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the file at `path` (or the default location) and applies the
/// command-line overrides.
///
/// # Errors
///
/// Any [`ConfigError`] except [`ConfigError::Tls`].
pub fn load_relay_config(
    path: Option<&Path>,
    overrides: &Overrides,
) -> Result<RelayConfig, ConfigError> {
    let path = match path {
        Some(p) => expand_tilde(&p.to_string_lossy()),
        None => default_config_path(),
    };
    tracing::debug!("loading configuration from {}", path.display());
    load_file(&path)?.into_relay_config(overrides)
}

impl FileConfig {
    /// Validates the file contents and merges in `overrides`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`], [`ConfigError::Invalid`],
    /// [`ConfigError::Credentials`] or [`ConfigError::NoBackend`].
    pub fn into_relay_config(self, overrides: &Overrides) -> Result<RelayConfig, ConfigError> {
        let relay = self.relay;

        let username = relay.username.ok_or(ConfigError::Missing("relay.username"))?;
        let digest = relay.password.ok_or(ConfigError::Missing("relay.password"))?;
        let credentials = Credentials::new(username, &digest)?;

        let cert_path = relay
            .cert
            .map(|c| expand_tilde(&c))
            .ok_or(ConfigError::Missing("relay.cert"))?;
        let key_path = relay
            .key
            .map(|k| expand_tilde(&k))
            .ok_or(ConfigError::Missing("relay.key"))?;

        let backend = match (&overrides.mock, self.backend.command.split_first()) {
            (Some(script), _) => BackendConfig::Scripted {
                script: expand_tilde(&script.to_string_lossy()),
            },
            (None, Some((program, args))) => BackendConfig::Process {
                program: program.clone(),
                args: args.to_vec(),
            },
            (None, None) => return Err(ConfigError::NoBackend),
        };

        if self.backend.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "backend.event_queue_capacity",
                reason: "must be at least 1".into(),
            });
        }

        Ok(RelayConfig {
            host: overrides.host.clone().unwrap_or(relay.host),
            port: overrides.port.unwrap_or(relay.port),
            cert_path,
            key_path,
            credentials,
            liveness: self.liveness.into_liveness_config()?,
            backend,
            event_queue_capacity: self.backend.event_queue_capacity,
        })
    }
}

impl LivenessSection {
    fn into_liveness_config(self) -> Result<LivenessConfig, ConfigError> {
        Ok(LivenessConfig {
            external_ping_interval: positive_secs(
                "liveness.external_ping_interval_secs",
                self.external_ping_interval_secs,
            )?,
            client_ping_interval: positive_secs(
                "liveness.client_ping_interval_secs",
                self.client_ping_interval_secs,
            )?,
            pong_timeout: positive_secs("liveness.pong_timeout_secs", self.pong_timeout_secs)?,
            command_timeout: positive_secs(
                "liveness.command_timeout_secs",
                self.command_timeout_secs,
            )?,
            handshake_timeout: positive_secs(
                "liveness.handshake_timeout_secs",
                self.handshake_timeout_secs,
            )?,
        })
    }
}

fn positive_secs(field: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_secs(secs))
}

// ── Paths ─────────────────────────────────────────────────────────────────────

/// Candidate configuration files, most specific first.
pub fn config_candidates() -> Vec<PathBuf> {
    candidates_from(
        std::env::var_os("XDG_CONFIG_HOME"),
        std::env::var_os("HOME"),
    )
}

/// The first candidate that exists, or the most specific one if none does
/// (so the "cannot read" error names a sensible path).
pub fn default_config_path() -> PathBuf {
    let candidates = config_candidates();
    candidates
        .iter()
        .find(|p| p.is_file())
        .or_else(|| candidates.first())
        .cloned()
        .unwrap_or_else(|| Path::new(SYSTEM_CONFIG_DIR).join(APP_DIR).join(FILE_NAME))
}

fn candidates_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(xdg) = xdg_config_home.filter(|v| !v.is_empty()) {
        out.push(PathBuf::from(xdg).join(APP_DIR).join(FILE_NAME));
    }
    if let Some(home) = home.filter(|v| !v.is_empty()) {
        let path = PathBuf::from(home).join(".config").join(APP_DIR).join(FILE_NAME);
        if !out.contains(&path) {
            out.push(path);
        }
    }
    out.push(Path::new(SYSTEM_CONFIG_DIR).join(APP_DIR).join(FILE_NAME));
    out
}

/// Expands a leading `~` or `~/` to `$HOME`.  Other paths pass through.
pub fn expand_tilde(path: &str) -> PathBuf {
    expand_with_home(path, std::env::var_os("HOME"))
}

fn expand_with_home(path: &str, home: Option<OsString>) -> PathBuf {
    let Some(home) = home else {
        return PathBuf::from(path);
    };
    if path == "~" {
        PathBuf::from(home)
    } else if let Some(rest) = path.strip_prefix("~/") {
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
