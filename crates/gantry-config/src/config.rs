use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the server numbers its outbound messages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqModeSetting {
    /// 1, 2, 3, ... per session.
    #[default]
    Monotonic,
    /// Every message carries 0.
    Fixed,
}

/// Log verbosity level.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug messages.
    Debug,
    /// Informational messages (default).
    #[default]
    Info,
    /// Warnings only.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the DAP listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Keep serving after the first client disconnects.
    #[serde(default = "default_true")]
    pub accept_multi_client: bool,
}

fn default_listen() -> String {
    "127.0.0.1:4711".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            accept_multi_client: true,
        }
    }
}

/// Per-session protocol settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub seq_mode: SeqModeSetting,
    /// Milliseconds between debuggee exit and automatic teardown.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,
}

fn default_terminate_grace_ms() -> u64 {
    1000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            seq_mode: SeqModeSetting::Monotonic,
            terminate_grace_ms: default_terminate_grace_ms(),
        }
    }
}

/// Settings for `debug` and `test` launches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Cargo executable.
    #[serde(default = "default_cargo")]
    pub cargo: String,
    /// Output path used when a launch names none.
    #[serde(default = "default_output")]
    pub default_output: PathBuf,
    /// Extra arguments appended to every cargo invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_cargo() -> String {
    "cargo".to_string()
}

fn default_output() -> PathBuf {
    PathBuf::from("__debug_bin")
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cargo: default_cargo(),
            default_output: default_output(),
            extra_args: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    /// Log file; stderr when unset.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Top-level gantry configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub log: LogConfig,
}
