//! Compiling debug and test binaries before launch.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

/// Which kind of binary to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    /// The package's executable, unoptimized with debug info.
    Debug,
    /// The package's test harness.
    Test,
}

/// Produces a debuggable binary from a source package.
///
/// `build` blocks; callers run it off the async runtime.
pub trait Builder: Send + Sync {
    /// Build `source` and place the resulting executable at `output`.
    ///
    /// On failure the error is the toolchain's diagnostic text, verbatim.
    fn build(&self, kind: BuildKind, source: &Path, output: &Path) -> Result<PathBuf, String>;
}

/// Builds packages by invoking cargo.
#[derive(Debug, Clone)]
pub struct CargoBuilder {
    cargo: String,
    extra_args: Vec<String>,
}

impl Default for CargoBuilder {
    fn default() -> Self {
        Self::new("cargo", Vec::new())
    }
}

impl CargoBuilder {
    pub fn new(cargo: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            cargo: cargo.into(),
            extra_args,
        }
    }

    fn command(&self, kind: BuildKind, manifest: &Path) -> Command {
        let mut cmd = Command::new(&self.cargo);
        match kind {
            BuildKind::Debug => {
                cmd.arg("build");
            }
            BuildKind::Test => {
                cmd.args(["test", "--no-run"]);
            }
        }
        cmd.arg("--message-format=json-render-diagnostics")
            .arg("--manifest-path")
            .arg(manifest)
            .args(&self.extra_args);
        cmd
    }
}

impl Builder for CargoBuilder {
    fn build(&self, kind: BuildKind, source: &Path, output: &Path) -> Result<PathBuf, String> {
        let manifest = manifest_path(source);
        info!(?kind, manifest = %manifest.display(), "building debuggee");

        let result = self
            .command(kind, &manifest)
            .output()
            .map_err(|e| format!("{}: {e}", self.cargo))?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(stderr.trim_end().to_string());
        }

        let stdout = String::from_utf8_lossy(&result.stdout);
        let artifact = select_artifact(&stdout, kind)
            .ok_or_else(|| "build produced no executable artifact".to_string())?;
        debug!(artifact = %artifact.display(), "build artifact");

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
        }
        std::fs::copy(&artifact, output)
            .map_err(|e| format!("cannot copy {} to {}: {e}", artifact.display(), output.display()))?;
        Ok(output.to_path_buf())
    }
}

/// Manifest for a package directory or an explicit manifest file.
fn manifest_path(source: &Path) -> PathBuf {
    if source.extension().is_some_and(|ext| ext == "toml") {
        source.to_path_buf()
    } else {
        source.join("Cargo.toml")
    }
}

/// Pick the executable from cargo's JSON message stream.
///
/// The last matching artifact wins: cargo reports dependencies first.
fn select_artifact(messages: &str, kind: BuildKind) -> Option<PathBuf> {
    messages
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter(|msg| msg["reason"] == "compiler-artifact")
        .filter(|msg| match kind {
            BuildKind::Test => msg["profile"]["test"] == true,
            BuildKind::Debug => {
                msg["profile"]["test"] != true
                    && msg["target"]["kind"]
                        .as_array()
                        .is_some_and(|kinds| kinds.iter().any(|k| k == "bin"))
            }
        })
        .filter_map(|msg| msg["executable"].as_str().map(PathBuf::from))
        .last()
}
