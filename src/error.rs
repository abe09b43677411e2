//! Failures that abort a console session.

use std::time::Duration;

/// Fatal, non-retryable session errors.
///
/// Everything else (unmatched output, input to a dead process) is absorbed
/// by the driver and reported as feedback.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The guest printed its dead-end banner and cannot recover.
    #[error(
        "the VM is stuck: {line:?}\n\
         Reconnect to the running container to debug, or retry with less load on this machine."
    )]
    StuckSession { line: String },

    /// A program moved to a state it does not define.
    #[error(
        "program '{program}' entered unknown state {state:?}; available states: {available:?}\n\
         recent transitions:\n{history}"
    )]
    UnknownState {
        program: String,
        state: String,
        available: Vec<String>,
        history: String,
    },

    /// The guest rejected the credentials and asked to log in again.
    #[error("login as '{username}' failed: incorrect username or password")]
    IncorrectPassword { username: String },

    /// No output arrived for the watchdog period and the process was killed.
    #[error("no output for {timeout:?}; the emulator was killed")]
    Unresponsive { timeout: Duration },

    #[error("console I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
