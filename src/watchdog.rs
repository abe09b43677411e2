//! Inactivity timer for the guest console.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

enum Command {
    Reset,
    Stop,
}

/// Calls back when no [`Watchdog::reset`] arrived within the timeout.
///
/// A non-repeating watchdog fires at most once. A repeating one keeps firing
/// every `timeout` until it is reset or stopped. Dropping the watchdog stops
/// its thread.
pub struct Watchdog {
    timeout: Duration,
    repeating: bool,
    commands: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn start<F>(timeout: Duration, repeating: bool, mut timed_out: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (commands, rx) = mpsc::channel();
        let handle = thread::spawn(move || loop {
            match rx.recv_timeout(timeout) {
                Ok(Command::Reset) => continue,
                Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("no output for {:?}", timeout);
                    timed_out();
                    if !repeating {
                        break;
                    }
                }
            }
        });
        debug!("watchdog started: timeout {:?}, repeating {}", timeout, repeating);
        Self {
            timeout,
            repeating,
            commands,
            handle: Some(handle),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_repeating(&self) -> bool {
        self.repeating
    }

    /// Restart the countdown. Does nothing once the watchdog has ended.
    pub fn reset(&self) {
        let _ = self.commands.send(Command::Reset);
    }

    /// Stop the countdown for good and wait for the timer thread.
    pub fn stop(&mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("watchdog callback panicked");
            }
        }
    }

    /// Whether the timer thread is still counting.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
