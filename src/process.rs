//! The process a session drives.
//!
//! The session never talks to Docker directly. It receives a
//! [`GuestProcess`] for writing keyboard input and controlling the process
//! lifetime, plus a channel of classified output lines produced by reader
//! threads. [`crate::docker::DockerPi`] is the real implementation; tests
//! use an in-memory one.

use std::io;
use std::path::Path;
use std::sync::mpsc::Receiver;

use anyhow::Result;

use crate::io::Io;

/// Control handle of a running guest process.
pub trait GuestProcess: Send {
    /// Write `input` verbatim to the process' stdin.
    fn write_input(&mut self, input: &str) -> io::Result<()>;

    fn is_alive(&mut self) -> bool;

    /// Ask the process to terminate.
    fn destroy(&mut self) -> io::Result<()>;

    /// Terminate the process immediately.
    fn destroy_forcibly(&mut self) -> io::Result<()>;

    /// Block until the process exits and return its exit code.
    fn wait_for_exit(&mut self) -> io::Result<i32>;

    /// Identifier used in feedback messages.
    fn describe(&self) -> String {
        "guest process".to_string()
    }
}

/// A freshly started guest process and the stream of its output.
pub struct Spawned {
    pub process: Box<dyn GuestProcess>,
    /// Closed once all output of the process has been delivered.
    pub output: Receiver<Io>,
}

/// Starts guest processes for an image.
pub trait Spawner {
    fn spawn(&self, image: &Path, name: &str) -> Result<Spawned>;
}
