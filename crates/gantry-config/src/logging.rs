//! Log-file helpers: default location, rotation and level filters.
//!
//! Subscriber setup lives in the binary; this crate only deals with paths
//! and files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate once the active log reaches this size (10 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Rotated files kept next to the active log.
pub const DEFAULT_MAX_LOG_FILES: u32 = 5;

/// `~/.config/gantry`, or `None` if there is no home directory.
pub fn config_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".config").join("gantry"))
}

/// `~/.local/share/gantry/logs/gantry.log`, falling back to the temp dir.
pub fn default_log_file_path() -> PathBuf {
    match home_dir() {
        Some(home) => home
            .join(".local")
            .join("share")
            .join("gantry")
            .join("logs")
            .join("gantry.log"),
        None => std::env::temp_dir().join("gantry").join("gantry.log"),
    }
}

fn home_dir() -> Option<PathBuf> {
    dirs::home_dir().or_else(|| std::env::var_os("HOME").map(PathBuf::from))
}

/// Create the parent directory of `log_path` if needed.
pub fn ensure_log_dir(log_path: &Path) -> io::Result<()> {
    match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Rotate `log_path` once it reaches `max_size` bytes.
///
/// ```text
///   gantry.log   -> gantry.log.1
///   gantry.log.1 -> gantry.log.2
///   ...
///   gantry.log.<max_files> is deleted
/// ```
pub fn rotate_log_files(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    let len = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if len < max_size || max_files == 0 {
        return Ok(());
    }

    let oldest = rotated_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for i in (1..max_files).rev() {
        let from = rotated_path(log_path, i);
        if from.exists() {
            fs::rename(&from, rotated_path(log_path, i + 1))?;
        }
    }
    fs::rename(log_path, rotated_path(log_path, 1))
}

/// Map a level name (any case) to a `tracing` filter directive.
/// Unknown names fall back to `"info"`.
pub fn log_level_to_filter(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let name = base.file_name().unwrap_or_default().to_string_lossy();
    let parent = base.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{name}.{index}"))
}
