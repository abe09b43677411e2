//! Programs: small state machines that operate a guest console.
//!
//! A [`Program`] does not run *in* the guest but *on* it, the way a person
//! types at a terminal. Every line of console output is handed to the
//! transition of the current state, which may type input through
//! [`RunningOs`] and returns the next state:
//!
//! - the same state to keep waiting,
//! - another state to advance,
//! - `None` once the program is done.
//!
//! Output a transition does not recognize (kernel messages, boot noise) must
//! simply keep the current state.
//!
//! The first line a program sees goes to its initial transition, which picks
//! the entry state. That line is then handed to the entry state as well, so a
//! prompt that is already on screen is acted upon immediately.

pub mod script;

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, info, warn};

use crate::driver::RunningOs;
use crate::error::SessionError;
use crate::io::Io;
use crate::status::HasStatus;

pub use script::{compile_script, compile_setup_script, from_commands, from_setup_script, login, shutdown};

/// Maps a line of unformatted output to the next state; `None` completes the program.
pub type Transition = Box<dyn Fn(&mut RunningOs, &str) -> Option<String> + Send>;

/// Box a closure as a [`Transition`].
pub fn transition<F>(f: F) -> Transition
where
    F: Fn(&mut RunningOs, &str) -> Option<String> + Send + 'static,
{
    Box::new(f)
}

const HISTORY_LIMIT: usize = 100;
const HISTORY_REPORTED: usize = 10;

/// One processed line: the state before, the output, and the state after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub old: Option<String>,
    pub output: String,
    pub new: Option<String>,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let output = if self.output.trim().is_empty() {
            "\u{2400}".to_string()
        } else {
            self.output.escape_debug().to_string()
        };
        match (&self.old, &self.new) {
            (None, Some(new)) => write!(f, "▶ ❬{}❭ {}", new, output),
            (None, None) => write!(f, "▶ ⏹ {}", output),
            (Some(_), None) => write!(f, "⏹ {}", output),
            (Some(old), Some(new)) if old == new => write!(f, "❬{}❭ ↻ {}", old, output),
            (Some(old), Some(new)) => write!(f, "❬{}❭ → ❬{}❭ {}", old, new, output),
        }
    }
}

/// A named state machine operating a guest console.
pub struct Program {
    name: String,
    initial: Transition,
    states: Vec<(String, Transition)>,
    state: Option<String>,
    initiating: bool,
    history: VecDeque<Step>,
    logging: bool,
}

impl Program {
    pub fn new(name: impl Into<String>, initial: Transition, states: Vec<(String, Transition)>) -> Self {
        Self {
            name: name.into(),
            initial,
            states,
            state: None,
            initiating: true,
            history: VecDeque::new(),
            logging: false,
        }
    }

    /// Log every step at info level instead of debug.
    pub fn logging(mut self) -> Self {
        self.logging = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current state; `None` both before the first line and after completion.
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn state_names(&self) -> Vec<&str> {
        self.states.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn is_started(&self) -> bool {
        !self.initiating
    }

    pub fn is_halted(&self) -> bool {
        !self.initiating && self.state.is_none()
    }

    pub fn history(&self) -> impl Iterator<Item = &Step> {
        self.history.iter()
    }

    /// Process one line of output.
    ///
    /// Returns `Ok(true)` while the program still needs output and
    /// `Ok(false)` once it completed. A halted program ignores further lines.
    pub fn calc(&mut self, os: &mut RunningOs, io: &Io) -> Result<bool, SessionError> {
        let line = io.unformatted();

        let current = if self.initiating {
            self.initiating = false;
            let entered = (self.initial)(os, line);
            self.record(None, line, entered.clone());
            match entered {
                Some(state) => state,
                None => {
                    self.state = None;
                    return Ok(false);
                }
            }
        } else {
            match self.state.clone() {
                Some(state) => state,
                None => {
                    warn!("program '{}' already completed; ignoring {:?}", self.name, line);
                    return Ok(false);
                }
            }
        };
        self.state = Some(current.clone());

        let transition = self
            .states
            .iter()
            .find(|(name, _)| *name == current)
            .map(|(_, transition)| transition);
        let Some(transition) = transition else {
            return Err(self.unknown_state(&current));
        };

        let next = transition(os, line);
        self.record(Some(current), line, next.clone());
        self.state = next;
        Ok(self.state.is_some())
    }

    fn record(&mut self, old: Option<String>, output: &str, new: Option<String>) {
        let step = Step {
            old,
            output: output.to_string(),
            new,
        };
        if self.logging {
            info!("{} step #{}: {}", self.name, self.history.len(), step);
        } else {
            debug!("{} step #{}: {}", self.name, self.history.len(), step);
        }
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(step);
    }

    fn unknown_state(&self, state: &str) -> SessionError {
        let skip = self.history.len().saturating_sub(HISTORY_REPORTED);
        let history = self
            .history
            .iter()
            .skip(skip)
            .map(|step| format!("  {}", step))
            .collect::<Vec<_>>()
            .join("\n");
        SessionError::UnknownState {
            program: self.name.clone(),
            state: state.to_string(),
            available: self.state_names().into_iter().map(String::from).collect(),
            history,
        }
    }
}

impl HasStatus for Program {
    fn status(&self) -> String {
        match &self.state {
            Some(state) if !self.states.is_empty() => format!("{} ❬{}❭", self.name, state),
            _ => self.name.clone(),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("states", &self.state_names())
            .field("initiating", &self.initiating)
            .finish()
    }
}

/// Render program names for a headline, e.g. `setup ◀ cleanup`.
pub fn format_names(programs: &[Program]) -> String {
    if programs.is_empty() {
        return "no programs".to_string();
    }
    programs.iter().map(|p| p.name()).collect::<Vec<_>>().join(" ◀ ")
}
