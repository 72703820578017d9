//! Debug session state machine.

use crate::error::DapError;

/// The current state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection accepted; no `initialize` yet.
    Created,
    /// The `initialize` handshake has completed.
    Initialized,
    /// A debuggee was started; configuration has not opened yet.
    Launched,
    /// Waiting for breakpoints and `configurationDone`.
    AwaitingLaunch,
    /// A breakpoint request is being applied.
    Configuring,
    /// The debuggee is executing.
    Running,
    /// The debuggee is parked (entry or breakpoint).
    Stopped,
    /// The debuggee has exited.
    Terminated,
    /// Teardown has run.
    Disconnected,
}

/// States in which breakpoint requests are accepted.
pub const CONFIGURABLE: &[SessionState] = &[
    SessionState::Created,
    SessionState::Initialized,
    SessionState::AwaitingLaunch,
    SessionState::Stopped,
];

/// Lifecycle of a single debug session.
///
/// Transitions fail with [`DapError::Rejected`] when the current state
/// does not allow them, leaving the state unchanged.
#[derive(Debug)]
pub struct SessionLifecycle {
    state: SessionState,
}

impl SessionLifecycle {
    /// Create a lifecycle in the [`Created`](SessionState::Created) state.
    pub fn new() -> Self {
        Self {
            state: SessionState::Created,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check that `command` is valid in the current state.
    pub fn require(&self, command: &str, allowed: &[SessionState]) -> Result<(), DapError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.rejected(command))
        }
    }

    /// Transition: Created → Initialized.
    pub fn initialize(&mut self) -> Result<(), DapError> {
        self.advance("initialize", &[SessionState::Created], SessionState::Initialized)
    }

    /// Transition: Initialized → Launched.
    pub fn launched(&mut self) -> Result<(), DapError> {
        self.advance("launch", &[SessionState::Initialized], SessionState::Launched)
    }

    /// Transition: Launched → AwaitingLaunch, once `initialized` has been sent.
    pub fn await_configuration(&mut self) -> Result<(), DapError> {
        self.advance(
            "launch",
            &[SessionState::Launched],
            SessionState::AwaitingLaunch,
        )
    }

    /// Enter Configuring for a breakpoint request.
    ///
    /// Returns the state to restore with [`end_configuring`](Self::end_configuring).
    pub fn begin_configuring(&mut self, command: &str) -> Result<SessionState, DapError> {
        self.require(command, CONFIGURABLE)?;
        let previous = self.state;
        self.state = SessionState::Configuring;
        Ok(previous)
    }

    /// Leave Configuring. A transition that happened meanwhile wins.
    pub fn end_configuring(&mut self, previous: SessionState) {
        if self.state == SessionState::Configuring {
            self.state = previous;
        }
    }

    /// Transition: AwaitingLaunch → Stopped (entry stop) or Running.
    pub fn configuration_done(&mut self, stop_on_entry: bool) -> Result<(), DapError> {
        let next = if stop_on_entry {
            SessionState::Stopped
        } else {
            SessionState::Running
        };
        self.advance("configurationDone", &[SessionState::AwaitingLaunch], next)
    }

    /// Transition: Stopped → Running. Already running stays running.
    pub fn resume(&mut self) -> Result<(), DapError> {
        self.advance(
            "continue",
            &[SessionState::Stopped, SessionState::Running],
            SessionState::Running,
        )
    }

    /// Transition: Running → Stopped, on an engine stop.
    pub fn handle_stopped(&mut self) -> Result<(), DapError> {
        self.advance("stopped", &[SessionState::Running], SessionState::Stopped)
    }

    /// Transition: any live state → Terminated, on debuggee exit.
    pub fn handle_terminated(&mut self) -> Result<(), DapError> {
        if self.state == SessionState::Disconnected {
            return Err(self.rejected("terminated"));
        }
        self.state = SessionState::Terminated;
        Ok(())
    }

    /// Transition: any → Disconnected.
    pub fn disconnect(&mut self) {
        self.state = SessionState::Disconnected;
    }

    fn advance(
        &mut self,
        command: &str,
        allowed: &[SessionState],
        next: SessionState,
    ) -> Result<(), DapError> {
        self.require(command, allowed)?;
        self.state = next;
        Ok(())
    }

    fn rejected(&self, command: &str) -> DapError {
        DapError::Rejected {
            message: format!("cannot {command}: session is in {:?} state", self.state),
        }
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
