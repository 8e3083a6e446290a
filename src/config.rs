//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `LM_REMOTE_URL`, `LM_REMOTE_TIMEOUT`,
//!    `LMRELAY_LISTEN`
//! 2. **Config file** — path via `--config <path>`, or `lmrelay.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:9188"
//!
//! [logging]
//! level = "info"
//!
//! [remote]
//! url = "http://10.0.0.5:8188"   # empty/omitted = proxying disabled
//! timeout_secs = 30
//!
//! # Ordered — first matching remote prefix wins
//! [[remote.path_mappings]]
//! remote = "/mnt/loras"
//! local = "/srv/models/loras"
//! ```

use serde::Deserialize;
use std::borrow::Cow;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings for the standalone binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:9188`).
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Remote LoRA Manager connection settings.
///
/// An empty `url` disables the whole proxy subsystem: the dispatch layer
/// passes every request through and the client refuses to act.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the remote instance, no trailing slash (stripped on load).
    /// Override with `LM_REMOTE_URL`.
    #[serde(default)]
    pub url: String,
    /// Total-duration budget per proxied/client HTTP request in seconds
    /// (default 30). Override with `LM_REMOTE_TIMEOUT`.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Remote→local path prefix rewrites, applied to `file_path` values
    /// returned by the remote. Ordered — first matching prefix wins.
    #[serde(default)]
    pub path_mappings: Vec<PathMapping>,
}

/// One remote→local path prefix rewrite.
#[derive(Debug, Clone, Deserialize)]
pub struct PathMapping {
    pub remote: String,
    pub local: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:9188".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_timeout_secs(),
            path_mappings: Vec::new(),
        }
    }
}

impl RemoteConfig {
    /// Whether a remote instance is configured at all.
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }

    /// Apply the remote→local path prefix mappings to an absolute remote path.
    ///
    /// Mappings are checked in insertion order; the first matching prefix is
    /// rewritten. Paths matching no mapping pass through unchanged.
    pub fn map_path<'a>(&self, remote_path: &'a str) -> Cow<'a, str> {
        for mapping in &self.path_mappings {
            if let Some(rest) = remote_path.strip_prefix(&mapping.remote) {
                return Cow::Owned(format!("{}{rest}", mapping.local));
            }
        }
        Cow::Borrowed(remote_path)
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `lmrelay.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("lmrelay.toml").exists() {
            let content =
                std::fs::read_to_string("lmrelay.toml").expect("Failed to read lmrelay.toml");
            toml::from_str(&content).expect("Failed to parse lmrelay.toml")
        } else {
            Config {
                server: ServerConfig::default(),
                remote: RemoteConfig::default(),
                logging: LoggingConfig::default(),
            }
        };

        config.apply_env_overrides();
        config.normalize();
        config
    }

    /// Env var overrides (highest precedence).
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("LM_REMOTE_URL") {
            self.remote.url = url;
        }
        if let Ok(timeout) = std::env::var("LM_REMOTE_TIMEOUT") {
            match timeout.parse() {
                Ok(secs) => self.remote.timeout_secs = secs,
                Err(_) => tracing::warn!(value = %timeout, "Ignoring invalid LM_REMOTE_TIMEOUT"),
            }
        }
        if let Ok(listen) = std::env::var("LMRELAY_LISTEN") {
            self.server.listen = listen;
        }
    }

    /// Post-load cleanup applied regardless of source.
    fn normalize(&mut self) {
        let stripped_len = self.remote.url.trim_end_matches('/').len();
        self.remote.url.truncate(stripped_len);
    }
}
