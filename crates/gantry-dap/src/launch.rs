//! Launch request validation and orchestration.
//!
//! Validation runs in a fixed order: program, then mode, then the
//! mode-specific work (build and/or spawn). The first failure wins.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::builder::{BuildKind, Builder};
use crate::engine::{Backend, Debuggee, EngineError, LaunchSpec, NotificationSender};
use crate::error::{ids, ErrorInfo};

/// Default name of the binary produced for debug and test launches.
pub const DEFAULT_OUTPUT: &str = "__debug_bin";

/// How the launch target is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Run a prebuilt executable.
    Exec,
    /// Build the package, then run it.
    Debug,
    /// Build the package's tests, then run them.
    Test,
}

/// A validated launch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub mode: LaunchMode,
    pub program: PathBuf,
    pub stop_on_entry: bool,
    pub output: Option<PathBuf>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to launch: The program attribute is missing in debug configuration.")]
    MissingProgram,

    /// Carries the offending value rendered as JSON.
    #[error("Failed to launch: Unsupported 'mode' value {0} in debug configuration.")]
    UnsupportedMode(String),

    #[error("Failed to launch: Build error: {0}")]
    Build(String),

    #[error("Failed to launch: {0}")]
    Engine(#[from] EngineError),
}

impl LaunchError {
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(ids::FAILED_TO_LAUNCH, "Failed to launch", self.to_string())
    }
}

impl LaunchConfig {
    /// Validate raw launch arguments.
    pub fn from_arguments(args: &Value) -> Result<Self, LaunchError> {
        let program = match args.get("program") {
            Some(Value::String(p)) if !p.is_empty() => PathBuf::from(p),
            _ => return Err(LaunchError::MissingProgram),
        };

        let mode = match args.get("mode") {
            None => LaunchMode::Debug,
            Some(Value::String(m)) if m.is_empty() => LaunchMode::Debug,
            Some(Value::String(m)) if m == "debug" => LaunchMode::Debug,
            Some(Value::String(m)) if m == "test" => LaunchMode::Test,
            Some(Value::String(m)) if m == "exec" => LaunchMode::Exec,
            Some(other) => return Err(LaunchError::UnsupportedMode(other.to_string())),
        };

        let stop_on_entry = args
            .get("stopOnEntry")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let output = args
            .get("output")
            .and_then(Value::as_str)
            .filter(|o| !o.is_empty())
            .map(PathBuf::from);
        let cwd = args
            .get("cwd")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(PathBuf::from);
        let launch_args = args
            .get("args")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|a| a.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            mode,
            program,
            stop_on_entry,
            output,
            args: launch_args,
            cwd,
        })
    }
}

/// A successfully started debuggee.
pub struct Launched {
    pub debuggee: Box<dyn Debuggee>,
    /// Binary produced by the builder; removed at teardown.
    pub artifact: Option<PathBuf>,
}

impl std::fmt::Debug for Launched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launched")
            .field("artifact", &self.artifact)
            .finish_non_exhaustive()
    }
}

/// Turns a [`LaunchConfig`] into a running debuggee.
pub struct LaunchOrchestrator {
    backend: Arc<dyn Backend>,
    builder: Arc<dyn Builder>,
    default_output: PathBuf,
}

impl LaunchOrchestrator {
    pub fn new(backend: Arc<dyn Backend>, builder: Arc<dyn Builder>) -> Self {
        Self {
            backend,
            builder,
            default_output: PathBuf::from(DEFAULT_OUTPUT),
        }
    }

    pub fn with_default_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.default_output = output.into();
        self
    }

    pub async fn launch(
        &self,
        config: &LaunchConfig,
        notifications: NotificationSender,
    ) -> Result<Launched, LaunchError> {
        let (binary, artifact) = match config.mode {
            LaunchMode::Exec => (absolute(&config.program), None),
            LaunchMode::Debug | LaunchMode::Test => {
                let kind = if config.mode == LaunchMode::Test {
                    BuildKind::Test
                } else {
                    BuildKind::Debug
                };
                let output = absolute(config.output.as_deref().unwrap_or(&self.default_output));
                let built = self.build(kind, absolute(&config.program), output).await?;
                (built.clone(), Some(built))
            }
        };

        let spec = LaunchSpec {
            program: binary,
            args: config.args.clone(),
            cwd: config.cwd.clone(),
        };
        info!(program = %spec.program.display(), mode = ?config.mode, "launching debuggee");

        let backend = Arc::clone(&self.backend);
        let started =
            tokio::task::spawn_blocking(move || backend.launch(&spec, notifications)).await;
        let result = match started {
            Ok(result) => result.map_err(LaunchError::from),
            Err(e) => Err(LaunchError::Engine(EngineError::Other(format!(
                "launch task failed: {e}"
            )))),
        };

        match result {
            Ok(debuggee) => Ok(Launched { debuggee, artifact }),
            Err(e) => {
                if let Some(path) = &artifact {
                    remove_artifact(path);
                }
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        kind: BuildKind,
        source: PathBuf,
        output: PathBuf,
    ) -> Result<PathBuf, LaunchError> {
        let builder = Arc::clone(&self.builder);
        tokio::task::spawn_blocking(move || builder.build(kind, &source, &output))
            .await
            .map_err(|e| LaunchError::Build(format!("build task failed: {e}")))?
            .map_err(LaunchError::Build)
    }
}

/// Resolve relative paths against the server's working directory.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Delete a built binary, tolerating one that is already gone.
pub(crate) fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed built binary"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to remove built binary: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_err(args: Value) -> String {
        LaunchConfig::from_arguments(&args).unwrap_err().to_string()
    }

    #[test]
    fn missing_program_variants() {
        let expected =
            "Failed to launch: The program attribute is missing in debug configuration.";
        assert_eq!(parse_err(json!({})), expected);
        assert_eq!(parse_err(json!({"program": null})), expected);
        assert_eq!(parse_err(json!({"program": 12345})), expected);
        assert_eq!(parse_err(json!({"program": ""})), expected);
    }

    #[test]
    fn program_checked_before_mode() {
        assert_eq!(
            parse_err(json!({"mode": "notamode"})),
            "Failed to launch: The program attribute is missing in debug configuration."
        );
    }

    #[test]
    fn unsupported_modes_render_as_json() {
        assert_eq!(
            parse_err(json!({"program": "x", "mode": "notamode"})),
            "Failed to launch: Unsupported 'mode' value \"notamode\" in debug configuration."
        );
        assert_eq!(
            parse_err(json!({"program": "x", "mode": 12345})),
            "Failed to launch: Unsupported 'mode' value 12345 in debug configuration."
        );
        assert_eq!(
            parse_err(json!({"program": "x", "mode": "remote"})),
            "Failed to launch: Unsupported 'mode' value \"remote\" in debug configuration."
        );
        assert_eq!(
            parse_err(json!({"program": "x", "mode": null})),
            "Failed to launch: Unsupported 'mode' value null in debug configuration."
        );
    }

    #[test]
    fn mode_defaults_to_debug() {
        let cfg = LaunchConfig::from_arguments(&json!({"program": "/src/pkg"})).unwrap();
        assert_eq!(cfg.mode, LaunchMode::Debug);
        let cfg =
            LaunchConfig::from_arguments(&json!({"program": "/src/pkg", "mode": ""})).unwrap();
        assert_eq!(cfg.mode, LaunchMode::Debug);
        assert!(!cfg.stop_on_entry);
        assert!(cfg.output.is_none());
    }

    #[test]
    fn optional_fields_parsed() {
        let cfg = LaunchConfig::from_arguments(&json!({
            "program": "/bin/app",
            "mode": "exec",
            "stopOnEntry": true,
            "output": "out/bin",
            "cwd": "/tmp",
            "args": ["--flag", 3, "value"]
        }))
        .unwrap();
        assert_eq!(cfg.mode, LaunchMode::Exec);
        assert!(cfg.stop_on_entry);
        assert_eq!(cfg.output, Some(PathBuf::from("out/bin")));
        assert_eq!(cfg.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(cfg.args, vec!["--flag".to_string(), "value".to_string()]);
    }

    #[test]
    fn non_bool_stop_on_entry_is_false() {
        let cfg =
            LaunchConfig::from_arguments(&json!({"program": "p", "stopOnEntry": "yes"})).unwrap();
        assert!(!cfg.stop_on_entry);
    }

    #[test]
    fn error_info_carries_launch_id() {
        let info = LaunchError::Build("oops".into()).to_error_info();
        assert_eq!(info.id, 3000);
        assert_eq!(info.summary, "Failed to launch");
        assert_eq!(info.format, "Failed to launch: Build error: oops");
    }

    #[test]
    fn absolute_keeps_absolute_paths() {
        assert_eq!(absolute(Path::new("/a/b")), PathBuf::from("/a/b"));
        assert!(absolute(Path::new("rel")).is_absolute());
    }
}
