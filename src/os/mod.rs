//! Operating systems that can be booted and driven.
//!
//! An [`OperatingSystem`] bundles what the session driver needs to know
//! about a guest: how its prompts look, which credentials log in, and how
//! to shut it down. The [`known`] table lists the Raspberry Pi images the
//! emulator has been used with.

pub mod known;
pub mod patterns;

use std::fmt;

pub use known::KnownOs;
pub use patterns::Patterns;

pub const DEFAULT_SHUTDOWN_COMMAND: &str = "sudo shutdown -h now";

/// Username and password for a console login.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Systems without a login (RISC OS, balenaOS) use empty credentials.
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

/// Description of a bootable guest operating system.
#[derive(Debug, Clone)]
pub struct OperatingSystem {
    /// Technical name, e.g. `raspberry-pi-lite`.
    pub name: String,
    /// Human readable name, e.g. `Raspberry Pi OS Lite`.
    pub full_name: String,
    pub download_url: Option<String>,
    pub default_credentials: Credentials,
    pub patterns: Patterns,
    pub shutdown_command: String,
}

impl OperatingSystem {
    /// A system with default prompt patterns and shutdown command.
    pub fn new(name: &str, full_name: &str, credentials: Credentials) -> Self {
        Self {
            name: name.to_string(),
            full_name: full_name.to_string(),
            download_url: None,
            default_credentials: credentials,
            patterns: Patterns::default(),
            shutdown_command: DEFAULT_SHUTDOWN_COMMAND.to_string(),
        }
    }

    pub fn with_patterns(mut self, patterns: Patterns) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn with_shutdown_command(mut self, command: &str) -> Self {
        self.shutdown_command = command.to_string();
        self
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name)
    }
}
