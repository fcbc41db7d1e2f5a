//! Endpoint configuration.
//!
//! Stored as TOML. The file is looked up in this order:
//! 1. first command-line argument
//! 2. `HIXIE_ECHO_CONFIG` environment variable
//! 3. `hixie-echo.toml` in the working directory
//!
//! A missing file means defaults; every field is optional.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use hixie_server::{
    ConcurrentClientPolicy, DEFAULT_ACTION_CAPACITY, ServerConfig, TimeoutPolicy,
};
use serde::{Deserialize, Serialize};

const CONFIG_ENV: &str = "HIXIE_ECHO_CONFIG";
const CONFIG_FILE: &str = "hixie-echo.toml";

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path prefix the endpoint is published under (not enforced).
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,

    /// Listen port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Host advertised in the handshake; local socket address when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Frame-pass deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,

    #[serde(default)]
    pub concurrent_clients: ConcurrentClientPolicy,

    /// Maximum number of registered actions.
    #[serde(default = "default_action_capacity")]
    pub action_capacity: usize,

    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    #[serde(default = "default_max_request_len")]
    pub max_request_len: usize,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Verbose logging. No effect on behaviour.
    #[serde(default)]
    pub debug: bool,
}

fn default_url_prefix() -> String {
    "/".into()
}

fn default_port() -> u16 {
    8080
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_action_capacity() -> usize {
    DEFAULT_ACTION_CAPACITY
}

fn default_max_frame_len() -> usize {
    ServerConfig::default().max_frame_len
}

fn default_max_request_len() -> usize {
    ServerConfig::default().max_request_len
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url_prefix: default_url_prefix(),
            port: default_port(),
            bind_addr: default_bind_addr(),
            host: None,
            timeout_ms: default_timeout_ms(),
            timeout_policy: TimeoutPolicy::default(),
            concurrent_clients: ConcurrentClientPolicy::default(),
            action_capacity: default_action_capacity(),
            max_frame_len: default_max_frame_len(),
            max_request_len: default_max_request_len(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            debug: false,
        }
    }
}

impl Config {
    /// Loads configuration, returning the file it came from (if any).
    pub fn load() -> anyhow::Result<(Self, Option<PathBuf>)> {
        let path = config_path();
        if path.exists() {
            let config = Self::from_file(&path)?;
            Ok((config, Some(path)))
        } else {
            Ok((Config::default(), None))
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Log filter used when `RUST_LOG` is not set.
    pub fn default_log_filter(&self) -> &'static str {
        if self.debug {
            "info,hixie_server=debug,hixie_echo=debug"
        } else {
            "info"
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            url_prefix: self.url_prefix.clone(),
            port: self.port,
            bind_addr: self.bind_addr,
            host: self.host.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            timeout_policy: self.timeout_policy,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            max_request_len: self.max_request_len,
            max_frame_len: self.max_frame_len,
            concurrent_clients: self.concurrent_clients,
        }
    }
}

fn config_path() -> PathBuf {
    if let Some(arg) = std::env::args_os().nth(1) {
        return PathBuf::from(arg);
    }
    if let Some(env) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(env);
    }
    PathBuf::from(CONFIG_FILE)
}
