//! The running guest as seen by programs.
//!
//! [`RunningOs`] owns the guest process exclusively. Programs call back into
//! it to type input, and the session loop uses it for stuck detection,
//! status reporting, shutdown and kill.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::io::Io;
use crate::os::{OperatingSystem, Patterns};
use crate::process::GuestProcess;
use crate::status::{HasStatus, StatusSink};

const HAPPY: &[&str] = &["(＾▽＾)", "ヽ(•‿•)ノ", "(✿◠‿◠)", "(•̀ᴗ•́)و", "ᕦ(ò_óˇ)ᕤ", "(ᵔᴥᵔ)"];
const SAD: &[&str] = &["(╥﹏╥)", "(ಥ﹏ಥ)", "(._.)", "(︶︹︺)", "(´°̥̥̥̥̥̥̥̥ω°̥̥̥̥̥̥̥̥｀)"];

/// Emulator warnings about the raw image format. Harmless, printed on every boot.
const IGNORED_ERRORS: &[&str] = &[
    "WARNING: Image format was not specified for '/sdcard/filesystem.img' and probing guessed raw.",
    "Automatically detecting the format is dangerous for raw images, write operations on block 0 will be restricted.",
    "Specify the 'raw' format explicitly to remove the restrictions.",
];

/// Lifecycle of a boot-and-run session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Booting,
    LoggingIn,
    RunningPrograms,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Booting => write!(f, "booting"),
            Phase::LoggingIn => write!(f, "logging in"),
            Phase::RunningPrograms => write!(f, "running programs"),
            Phase::ShuttingDown => write!(f, "shutting down"),
            Phase::Terminated => write!(f, "terminated"),
        }
    }
}

struct ShuttingDown;

impl HasStatus for ShuttingDown {
    fn status(&self) -> String {
        "shutting down".to_string()
    }
}

/// A booted guest operating system driven through its console.
pub struct RunningOs {
    process: Box<dyn GuestProcess>,
    sink: Arc<dyn StatusSink>,
    patterns: Patterns,
    shutdown_command: String,
    shutting_down: bool,
    phase: Phase,
    input_delay: Duration,
}

impl RunningOs {
    pub fn new(process: Box<dyn GuestProcess>, os: &OperatingSystem, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            process,
            sink,
            patterns: os.patterns.clone(),
            shutdown_command: os.shutdown_command.clone(),
            shutting_down: false,
            phase: Phase::Booting,
            input_delay: Duration::from_millis(10),
        }
    }

    /// Pause between consecutive values passed to one [`RunningOs::enter`] call.
    pub fn with_input_delay(mut self, delay: Duration) -> Self {
        self.input_delay = delay;
        self
    }

    pub fn patterns(&self) -> &Patterns {
        &self.patterns
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn advance(&mut self, phase: Phase) {
        if self.phase != phase && self.phase != Phase::Terminated {
            debug!("session phase: {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    /// Type `values` into the guest console, one after another.
    ///
    /// Callers terminate lines themselves, normally with `\r`. Input to a
    /// process that is no longer alive is reported, not raised.
    pub fn enter(&mut self, values: &[&str]) {
        let shown = values
            .iter()
            .map(|v| v.trim_end_matches(|c: char| c == '\r' || c == '\n'))
            .collect::<Vec<_>>()
            .join(", ");
        self.type_values(values, &format!("Entering \"{}\"", shown));
    }

    /// Like [`RunningOs::enter`] but keeps the value out of the log.
    pub fn enter_secret(&mut self, value: &str) {
        self.type_values(&[value], "Entering ********");
    }

    fn type_values(&mut self, values: &[&str], description: &str) {
        if !self.process.is_alive() {
            let message = format!("Process {} is not alive.", self.process.describe());
            self.feedback(&message);
            return;
        }

        self.feedback(description);
        for (i, value) in values.iter().enumerate() {
            if i > 0 && !self.input_delay.is_zero() {
                thread::sleep(self.input_delay);
            }
            if let Err(e) = self.process.write_input(value) {
                self.negative_feedback(&format!("Could not write to {}: {}", self.process.describe(), e));
                return;
            }
        }
    }

    /// Report a line without forwarding anything to the guest.
    pub fn feedback(&self, message: &str) {
        let marker = HAPPY.choose(&mut rand::thread_rng()).copied().unwrap_or("");
        self.sink.log_line(&format!("{} {}", marker, capitalize(message)));
    }

    /// Report a problem without forwarding anything to the guest.
    pub fn negative_feedback(&self, message: &str) {
        if IGNORED_ERRORS
            .iter()
            .any(|ignored| message.to_lowercase().contains(&ignored.to_lowercase()))
        {
            return;
        }
        let marker = SAD.choose(&mut rand::thread_rng()).copied().unwrap_or("");
        self.sink.log_line(&format!("{} {}", marker, capitalize(message)));
    }

    /// Report `io` together with the pending programs.
    pub fn status(&self, io: &Io, pending: &[&dyn HasStatus]) {
        if self.shutting_down {
            self.sink.status(io, &[&ShuttingDown]);
        } else {
            self.sink.status(io, pending);
        }
    }

    /// Whether `io` shows the guest's dead-end banner. A stuck guest is
    /// stopped before this returns.
    pub fn is_stuck(&mut self, io: &Io) -> bool {
        if !self.patterns.is_dead_end(io.unformatted()) {
            return false;
        }
        self.negative_feedback(
            "The VM is stuck. Chances are the VM starts correctly with less load on this machine.",
        );
        if let Err(e) = self.process.destroy() {
            warn!("stopping stuck {} failed: {}", self.process.describe(), e);
        }
        self.phase = Phase::Terminated;
        true
    }

    /// [`RunningOs::is_stuck`] as an error carrying the offending line.
    pub fn check_stuck(&mut self, io: &Io) -> Result<(), SessionError> {
        if self.is_stuck(io) {
            return Err(SessionError::StuckSession {
                line: io.unformatted().to_string(),
            });
        }
        Ok(())
    }

    /// Type the shutdown command. Calling this again only re-sends it.
    pub fn shutdown(&mut self) {
        let command = format!("{}\r", self.shutdown_command);
        self.enter(&[&command]);
        if !self.shutting_down {
            self.shutting_down = true;
            self.feedback("Shutdown invoked");
        }
        self.advance(Phase::ShuttingDown);
    }

    /// Forcibly terminate the guest process.
    pub fn kill(&mut self) -> io::Result<()> {
        self.feedback("Kill invoked");
        self.phase = Phase::Terminated;
        self.process.destroy_forcibly()
    }

    pub fn wait_for_exit(&mut self) -> io::Result<i32> {
        let code = self.process.wait_for_exit()?;
        self.phase = Phase::Terminated;
        Ok(code)
    }
}

impl fmt::Debug for RunningOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningOs")
            .field("process", &self.process.describe())
            .field("shutdown_command", &self.shutdown_command)
            .field("shutting_down", &self.shutting_down)
            .field("phase", &self.phase)
            .finish()
    }
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{Credentials, KnownOs};
    use crate::testing::running_os;

    #[test]
    fn test_enter_forwards_values() {
        let (mut os, fake, sink) = running_os(&KnownOs::RaspberryPiLite.descriptor());
        os.enter(&["ls -la\r", "exit\r"]);
        assert_eq!(fake.inputs(), vec!["ls -la\r", "exit\r"]);
        assert!(sink.lines().iter().any(|l| l.ends_with("Entering \"ls -la, exit\"")));
    }

    #[test]
    fn test_enter_on_dead_process_is_feedback() {
        let (mut os, fake, sink) = running_os(&KnownOs::RaspberryPiLite.descriptor());
        fake.set_alive(false);
        os.enter(&["ls\r"]);
        assert!(fake.inputs().is_empty());
        assert!(sink.lines().iter().any(|l| l.contains("is not alive")));
    }

    #[test]
    fn test_secret_is_not_logged() {
        let (mut os, fake, sink) = running_os(&KnownOs::RaspberryPiLite.descriptor());
        os.enter_secret("raspberry\r");
        assert_eq!(fake.inputs(), vec!["raspberry\r"]);
        assert!(sink.lines().iter().all(|l| !l.contains("raspberry")));
    }

    #[test]
    fn test_stuck_stops_process() {
        let (mut os, fake, _sink) = running_os(&KnownOs::RaspberryPiLite.descriptor());
        let line = Io::out("You are in emergency mode. After logging in, type \"journalctl -xb\"");
        assert!(os.is_stuck(&line));
        assert!(fake.destroyed());
        assert_eq!(os.phase(), Phase::Terminated);
    }

    #[test]
    fn test_not_stuck_leaves_process_running() {
        let (mut os, fake, _sink) = running_os(&KnownOs::RaspberryPiLite.descriptor());
        assert!(!os.is_stuck(&Io::out("[  OK  ] Started Emergency Shell.")));
        assert!(!os.is_stuck(&Io::out("raspberrypi login: ")));
        assert!(!fake.destroyed());
        assert!(os.is_alive());
    }

    #[test]
    fn test_check_stuck_reports_line() {
        let (mut os, _fake, _sink) = running_os(&KnownOs::RaspberryPiLite.descriptor());
        let err = os.check_stuck(&Io::out("\x1b[1mYou are in emergency mode.\x1b[0m")).unwrap_err();
        match err {
            SessionError::StuckSession { line } => assert_eq!(line, "You are in emergency mode."),
            other => panic!("expected StuckSession, got {other:?}"),
        }
    }

    #[test]
    fn test_without_dead_end_never_stuck() {
        let (mut os, fake, _sink) = running_os(&KnownOs::RiscOs.descriptor());
        assert!(!os.is_stuck(&Io::out("You are in emergency mode.")));
        assert!(!fake.destroyed());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let descriptor = OperatingSystem::new("t", "T", Credentials::default())
            .with_shutdown_command("poweroff");
        let (mut os, fake, sink) = running_os(&descriptor);
        os.shutdown();
        os.shutdown();
        assert!(os.is_shutting_down());
        assert_eq!(os.phase(), Phase::ShuttingDown);
        assert_eq!(fake.inputs(), vec!["poweroff\r", "poweroff\r"]);
        let invoked = sink.lines().iter().filter(|l| l.ends_with("Shutdown invoked")).count();
        assert_eq!(invoked, 1);
    }

    #[test]
    fn test_status_while_shutting_down() {
        let (mut os, _fake, sink) = running_os(&KnownOs::RaspberryPiLite.descriptor());
        let pending = "setup".to_string();
        os.status(&Io::out("a"), &[&pending]);
        os.shutdown();
        os.status(&Io::out("b"), &[&pending]);
        assert_eq!(
            sink.statuses(),
            vec![
                ("a".to_string(), "◀◀ setup".to_string()),
                ("b".to_string(), "◀◀ shutting down".to_string()),
            ]
        );
    }

    #[test]
    fn test_kill_terminates() {
        let (mut os, fake, _sink) = running_os(&KnownOs::RaspberryPiLite.descriptor());
        os.kill().unwrap();
        assert!(fake.killed());
        assert_eq!(os.phase(), Phase::Terminated);
        assert!(!os.is_alive());
    }

    #[test]
    fn test_ignored_emulator_warnings() {
        let (os, _fake, sink) = running_os(&KnownOs::RaspberryPiLite.descriptor());
        os.negative_feedback("Specify the 'raw' format explicitly to remove the restrictions.");
        assert!(sink.lines().is_empty());
        os.negative_feedback("qemu: something else");
        assert_eq!(sink.lines().len(), 1);
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("shutdown invoked"), "Shutdown invoked");
        assert_eq!(capitalize(""), "");
    }
}
