//! Source breakpoint bookkeeping for a debug session.
//!
//! Each `setBreakpoints` request replaces the full set for one source
//! file. The table remembers which engine handle backs each line so that
//! lines dropped from a request can be removed from the engine.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::engine::{BreakpointHandle, Debuggee, Placement};
use crate::protocol::{BreakpointResponse, Source};

/// A requested source breakpoint and its placement outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Source file path.
    pub path: PathBuf,
    /// Line the client asked for (1-based).
    pub line: i64,
    /// Line the engine placed it on, once verified.
    pub actual_line: Option<i64>,
    pub verified: bool,
    pub handle: Option<BreakpointHandle>,
    /// Why placement failed.
    pub message: Option<String>,
}

impl Breakpoint {
    /// Create a new unverified breakpoint at the given path and line.
    pub fn new(path: PathBuf, line: i64) -> Self {
        Self {
            path,
            line,
            actual_line: None,
            verified: false,
            handle: None,
            message: None,
        }
    }

    fn from_placement(path: &Path, line: i64, placement: Placement) -> Self {
        let mut bp = Self::new(path.to_path_buf(), line);
        match placement {
            Placement::Verified { handle, line } => {
                bp.verified = true;
                bp.handle = Some(handle);
                bp.actual_line = Some(line);
            }
            Placement::Unverified { reason } => bp.message = Some(reason),
        }
        bp
    }

    /// Wire form for a `setBreakpoints` response.
    pub fn to_response(&self) -> BreakpointResponse {
        BreakpointResponse {
            id: self.handle.map(|h| h.0 as i64),
            verified: self.verified,
            message: self.message.clone(),
            source: Some(Source {
                name: self
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned()),
                path: Some(self.path.to_string_lossy().into_owned()),
                source_reference: None,
            }),
            line: Some(self.actual_line.unwrap_or(self.line)),
        }
    }
}

/// Breakpoints across files for a debug session.
#[derive(Debug, Clone, Default)]
pub struct BreakpointTable {
    breakpoints: HashMap<PathBuf, Vec<Breakpoint>>,
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the breakpoints of `path` with `lines`.
    ///
    /// Lines already backed by an engine handle keep it; handles for lines
    /// no longer requested are removed from the engine. Without a debuggee
    /// every line is recorded unverified. Returns the new set in request
    /// order, duplicates collapsed.
    pub fn translate(
        &mut self,
        path: &Path,
        lines: &[i64],
        mut debuggee: Option<&mut dyn Debuggee>,
    ) -> Vec<Breakpoint> {
        let previous = self.breakpoints.remove(path).unwrap_or_default();

        let mut seen = HashSet::new();
        let requested: Vec<i64> = lines.iter().copied().filter(|l| seen.insert(*l)).collect();

        let mut reusable: HashMap<i64, Breakpoint> = HashMap::new();
        for bp in previous {
            let Some(handle) = bp.handle else { continue };
            if requested.contains(&bp.line) {
                reusable.insert(bp.line, bp);
            } else if let Some(engine) = debuggee.as_deref_mut() {
                debug!(path = %path.display(), line = bp.line, "removing stale breakpoint");
                if let Err(e) = engine.remove_breakpoint(handle) {
                    warn!(path = %path.display(), line = bp.line, "failed to remove breakpoint: {e}");
                }
            }
        }

        let placed: Vec<Breakpoint> = requested
            .into_iter()
            .map(|line| {
                if let Some(bp) = reusable.remove(&line) {
                    return bp;
                }
                match debuggee.as_deref_mut() {
                    Some(engine) => {
                        Breakpoint::from_placement(path, line, engine.set_breakpoint(path, line))
                    }
                    None => {
                        let mut bp = Breakpoint::new(path.to_path_buf(), line);
                        bp.message = Some("debuggee is not running".into());
                        bp
                    }
                }
            })
            .collect();

        if !placed.is_empty() {
            self.breakpoints.insert(path.to_path_buf(), placed.clone());
        }
        placed
    }
}
