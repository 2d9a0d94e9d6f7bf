// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Run-control state machine exposed to an external commander.
//!
//! # State Machine
//!
//! ```text
//!      +--------+
//!      | Booted |
//!      +---+----+
//!          | initialize()
//!          v
//!      +------------+
//!      |Initialized |<--------------+
//!      +-----+------+               |
//!            | start(run_id)        | stop()
//!            v                      |
//!      +---------+   pause()   +--------+
//!      | Running |------------>| Paused |
//!      +----+----+<------------+--------+
//!           |           resume()
//!           | shutdown()
//!           v
//!      +----------+
//!      | ShutDown |  (terminal)
//!      +----------+
//!
//! Any state --(failure)--> InRunError
//! ```

use crate::error::CoreError;
use parking_lot::Mutex;

/// Run-control state. Mirrors the commands a host process exposes to an
/// external run-control system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CommanderState {
    /// No core instance constructed yet.
    #[default]
    Booted,

    /// A core instance exists and is ready to start a run.
    Initialized,

    /// A run is active and fragments are flowing.
    Running,

    /// A run is active but paused; no fragments are accepted.
    Paused,

    /// `shutdown()` has completed; terminal.
    ShutDown,

    /// A transition failed in a way that requires operator intervention.
    InRunError,
}

impl CommanderState {
    pub fn is_operational(&self) -> bool {
        matches!(self, CommanderState::Running | CommanderState::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommanderState::ShutDown | CommanderState::InRunError)
    }
}

impl std::fmt::Display for CommanderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CommanderState::Booted => "Booted",
            CommanderState::Initialized => "Initialized",
            CommanderState::Running => "Running",
            CommanderState::Paused => "Paused",
            CommanderState::ShutDown => "ShutDown",
            CommanderState::InRunError => "InRunError",
        };
        write!(f, "{s}")
    }
}

/// What a `report(which)` call describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    State,
    RunId,
    Metrics,
}

/// A run-control report, formatted for whatever transport the caller uses
/// to relay it (log line, RPC response, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub kind: ReportKind,
    pub text: String,
}

struct Inner {
    state: CommanderState,
    run_id: Option<u32>,
    last_command: Option<(&'static str, u32)>,
}

/// Run-control state machine. A `Commander` wraps no I/O itself; a role
/// (`Reader`/`Builder`/`Consumer`) calls into it from whatever RPC or CLI
/// transport the host process chooses, and reacts to the resulting state.
pub struct Commander {
    inner: Mutex<Inner>,
}

impl Default for Commander {
    fn default() -> Self {
        Self::new()
    }
}

impl Commander {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { state: CommanderState::Booted, run_id: None, last_command: None }),
        }
    }

    pub fn state(&self) -> CommanderState {
        self.inner.lock().state
    }

    /// Tears down any existing instance (by simply forgetting its run id)
    /// and enters `Initialized`. Idempotent: calling it again from
    /// `Initialized` just re-initializes.
    pub fn initialize(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        inner.run_id = None;
        inner.state = CommanderState::Initialized;
        Ok(())
    }

    pub fn soft_initialize(&self) -> Result<(), CoreError> {
        self.initialize()
    }

    pub fn reinitialize(&self) -> Result<(), CoreError> {
        self.initialize()
    }

    pub fn start(&self, run_id: u32) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CommanderState::Initialized => {
                inner.run_id = Some(run_id);
                inner.state = CommanderState::Running;
                Ok(())
            }
            // Idempotent: already running this run id.
            CommanderState::Running if inner.run_id == Some(run_id) => Ok(()),
            other => Err(illegal("start", other)),
        }
    }

    pub fn pause(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CommanderState::Running => {
                inner.state = CommanderState::Paused;
                Ok(())
            }
            CommanderState::Paused => Ok(()),
            other => Err(illegal("pause", other)),
        }
    }

    pub fn resume(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CommanderState::Paused => {
                inner.state = CommanderState::Running;
                Ok(())
            }
            CommanderState::Running => Ok(()),
            other => Err(illegal("resume", other)),
        }
    }

    pub fn stop(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CommanderState::Running | CommanderState::Paused => {
                inner.run_id = None;
                inner.state = CommanderState::Initialized;
                Ok(())
            }
            CommanderState::Initialized => Ok(()),
            other => Err(illegal("stop", other)),
        }
    }

    pub fn shutdown(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        inner.state = CommanderState::ShutDown;
        Ok(())
    }

    /// Best-effort transition to `InRunError`, called when a subsystem
    /// reports a failure the run cannot continue through.
    pub fn in_run_failure(&self, reason: &str) {
        let mut inner = self.inner.lock();
        log::error!("run entering InRunError: {reason}");
        inner.state = CommanderState::InRunError;
    }

    pub fn rollover_subrun(&self, boundary: u64) -> Result<(), CoreError> {
        let inner = self.inner.lock();
        if !inner.state.is_operational() {
            return Err(illegal("rollover_subrun", inner.state));
        }
        let _ = boundary;
        Ok(())
    }

    /// Application-defined out-of-band command. Idempotent in the sense
    /// that repeating the same `(name, arg)` pair is recorded but not
    /// rejected; callers that care about exactly-once side effects check
    /// [`Commander::last_command`] themselves.
    pub fn meta_command(&self, name: &'static str, arg: u32) -> Result<(), CoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.is_operational() {
            return Err(illegal(name, inner.state));
        }
        inner.last_command = Some((name, arg));
        Ok(())
    }

    pub fn last_command(&self) -> Option<(&'static str, u32)> {
        self.inner.lock().last_command
    }

    pub fn report(&self, which: ReportKind) -> Report {
        let inner = self.inner.lock();
        let text = match which {
            ReportKind::State => inner.state.to_string(),
            ReportKind::RunId => inner.run_id.map(|id| id.to_string()).unwrap_or_else(|| "none".to_string()),
            ReportKind::Metrics => format!("state={} run_id={:?}", inner.state, inner.run_id),
        };
        Report { kind: which, text }
    }
}

fn illegal(command: &'static str, state: CommanderState) -> CoreError {
    CoreError::IllegalTransition { command, state: state_name(state) }
}

fn state_name(state: CommanderState) -> &'static str {
    match state {
        CommanderState::Booted => "Booted",
        CommanderState::Initialized => "Initialized",
        CommanderState::Running => "Running",
        CommanderState::Paused => "Paused",
        CommanderState::ShutDown => "ShutDown",
        CommanderState::InRunError => "InRunError",
    }
}
