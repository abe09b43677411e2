//! Prompt recognition for serial consoles.
//!
//! All patterns match a whole line (after ANSI stripping), ignoring case.

use anyhow::{Context, Result};
use regex::Regex;

pub const DEFAULT_LOGIN_PATTERN: &str = r"(?P<host>[\w-]+)\s+login:.*";
pub const DEFAULT_PASSWORD_PATTERN: &str = r"Password:\s*";
pub const DEFAULT_READY_PATTERN: &str = r"(?P<user>[\w-]+)@(?P<host>[\w-]+):(?P<path>[^#$]+?)[#$]\s*";
pub const DEFAULT_DEAD_END_PATTERN: &str = r".*in emergency mode.*";

/// Compile `pattern` so that it only matches complete lines, ignoring case.
pub fn whole_line(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("(?i)^(?:{})$", pattern))
        .with_context(|| format!("invalid prompt pattern '{}'", pattern))
}

/// The prompts a session driver needs to recognize for one operating system.
#[derive(Debug, Clone)]
pub struct Patterns {
    pub login: Regex,
    pub password: Regex,
    pub ready: Regex,
    /// Output after which the guest cannot recover (kernel panic, emergency
    /// mode). Some systems have none.
    pub dead_end: Option<Regex>,
}

impl Patterns {
    /// Build patterns from source strings.
    pub fn new(login: &str, password: &str, ready: &str, dead_end: Option<&str>) -> Result<Self> {
        Ok(Self {
            login: whole_line(login)?,
            password: whole_line(password)?,
            ready: whole_line(ready)?,
            dead_end: dead_end.map(whole_line).transpose()?,
        })
    }

    pub fn without_dead_end(mut self) -> Self {
        self.dead_end = None;
        self
    }

    /// `<host> login:` prompt. The `Last login:` banner printed after a
    /// successful login is not a prompt.
    pub fn is_login(&self, line: &str) -> bool {
        match self.login.captures(line) {
            Some(caps) => caps
                .name("host")
                .map_or(true, |host| !host.as_str().eq_ignore_ascii_case("last")),
            None => false,
        }
    }

    pub fn is_password(&self, line: &str) -> bool {
        self.password.is_match(line)
    }

    pub fn is_ready(&self, line: &str) -> bool {
        self.ready.is_match(line)
    }

    /// Always false when no dead-end pattern is configured.
    pub fn is_dead_end(&self, line: &str) -> bool {
        self.dead_end.as_ref().is_some_and(|re| re.is_match(line))
    }
}

impl Default for Patterns {
    fn default() -> Self {
        // The defaults are compile-time constants and known to be valid.
        Self {
            login: default_regex(DEFAULT_LOGIN_PATTERN),
            password: default_regex(DEFAULT_PASSWORD_PATTERN),
            ready: default_regex(DEFAULT_READY_PATTERN),
            dead_end: Some(default_regex(DEFAULT_DEAD_END_PATTERN)),
        }
    }
}

fn default_regex(pattern: &str) -> Regex {
    match whole_line(pattern) {
        Ok(re) => re,
        Err(e) => panic!("built-in pattern does not compile: {e:#}"),
    }
}
