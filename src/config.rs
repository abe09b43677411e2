//! Session configuration files.
//!
//! ```toml
//! [session]
//! image = "2021-05-07-raspios-buster-armhf-lite.img"
//! os = "raspberry-pi-lite"
//! watchdog_timeout_secs = 600
//! setup_script = "setup.txt"
//!
//! [credentials]
//! username = "pi"
//! password = "raspberry"
//!
//! [[program]]
//! name = "update"
//! commands = ["sudo apt-get update -qq", "sudo apt-get upgrade -y -qq"]
//! ```
//!
//! Relative paths are resolved against the directory of the config file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::os::patterns::whole_line;
use crate::os::{Credentials, KnownOs, OperatingSystem};
use crate::program::{self, Program};
use crate::session::SessionOptions;

/// File name looked up in the user's config directory.
pub const DEFAULT_CONFIG_FILE: &str = "session.toml";

/// A validated session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub image: PathBuf,
    /// Container name; derived from the image when absent.
    pub name: Option<String>,
    pub os: OperatingSystem,
    pub credentials: Credentials,
    pub options: SessionOptions,
    /// Also print guest output, not only feedback.
    pub verbose: bool,
    pub scripts: Vec<ScriptConfig>,
    pub setup_script: Option<SetupScript>,
}

/// A named list of commands run in order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptConfig {
    pub name: String,
    pub commands: Vec<String>,
}

/// A labelled setup script read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupScript {
    pub name: String,
    pub text: String,
}

impl SessionConfig {
    /// The programs to run after login: setup script blocks first, then the
    /// configured scripts.
    pub fn programs(&self) -> Result<Vec<Program>> {
        let mut programs = Vec::new();
        if let Some(setup) = &self.setup_script {
            programs.extend(program::compile_setup_script(&self.os, &setup.name, &setup.text)?);
        }
        for script in &self.scripts {
            programs.push(program::compile_script(&self.os, &script.name, &script.commands)?);
        }
        Ok(programs)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    session: SessionToml,
    credentials: Option<CredentialsToml>,
    patterns: Option<PatternsToml>,
    #[serde(default, rename = "program")]
    programs: Vec<ScriptConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionToml {
    image: String,
    os: String,
    name: Option<String>,
    auto_login: Option<bool>,
    auto_shutdown: Option<bool>,
    watchdog_timeout_secs: Option<u64>,
    kill_on_timeout: Option<bool>,
    verbose: Option<bool>,
    shutdown_command: Option<String>,
    setup_script: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialsToml {
    username: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatternsToml {
    login: Option<String>,
    password: Option<String>,
    ready: Option<String>,
    dead_end: Option<String>,
    #[serde(default)]
    no_dead_end: bool,
}

/// `<config dir>/imgboot/session.toml`, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("imgboot").join(DEFAULT_CONFIG_FILE))
}

pub fn load_config(config_path: &Path) -> Result<SessionConfig> {
    let config_text = fs::read_to_string(config_path)
        .with_context(|| format!("reading session config '{}'", config_path.display()))?;
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    parse_config(&config_text, base_dir)
        .with_context(|| format!("parsing session config '{}'", config_path.display()))
}

pub fn parse_config(config_text: &str, base_dir: &Path) -> Result<SessionConfig> {
    let parsed: ConfigToml = toml::from_str(config_text)?;
    let session = parsed.session;

    if session.image.trim().is_empty() {
        bail!("invalid session config: image must not be empty");
    }
    let image = resolve_path(base_dir, &session.image);

    let mut os = KnownOs::from_id(&session.os)?.descriptor();
    if let Some(command) = session.shutdown_command.as_deref() {
        if command.trim().is_empty() {
            bail!("invalid session config: shutdown_command must not be empty");
        }
        os = os.with_shutdown_command(command.trim());
    }
    if let Some(patterns) = parsed.patterns {
        apply_patterns(&mut os, patterns)?;
    }

    let credentials = match parsed.credentials {
        Some(creds) => Credentials::new(creds.username, creds.password),
        None => os.default_credentials.clone(),
    };

    let defaults = SessionOptions::default();
    let watchdog_timeout = match session.watchdog_timeout_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => defaults.watchdog_timeout,
    };
    let options = SessionOptions {
        auto_login: session.auto_login.unwrap_or(defaults.auto_login),
        auto_shutdown: session.auto_shutdown.unwrap_or(defaults.auto_shutdown),
        watchdog_timeout,
        kill_on_timeout: session.kill_on_timeout.unwrap_or(defaults.kill_on_timeout),
        poll: defaults.poll,
    };

    let mut seen = Vec::new();
    for script in &parsed.programs {
        let name = script.name.trim();
        if name.is_empty() {
            bail!("invalid session config: program names must not be empty");
        }
        if seen.contains(&name) {
            bail!("invalid session config: duplicate program '{}'", name);
        }
        seen.push(name);
    }

    let setup_script = match session.setup_script.as_deref() {
        Some(raw) => {
            let path = resolve_path(base_dir, raw);
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading setup script '{}'", path.display()))?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "setup".to_string());
            Some(SetupScript { name, text })
        }
        None => None,
    };

    let config = SessionConfig {
        image,
        name: session.name.filter(|n| !n.trim().is_empty()),
        os,
        credentials,
        options,
        verbose: session.verbose.unwrap_or(false),
        scripts: parsed.programs,
        setup_script,
    };
    // Surface empty scripts now rather than after booting
    config.programs()?;
    Ok(config)
}

fn apply_patterns(os: &mut OperatingSystem, patterns: PatternsToml) -> Result<()> {
    if let Some(login) = patterns.login.as_deref() {
        os.patterns.login = whole_line(login)?;
    }
    if let Some(password) = patterns.password.as_deref() {
        os.patterns.password = whole_line(password)?;
    }
    if let Some(ready) = patterns.ready.as_deref() {
        os.patterns.ready = whole_line(ready)?;
    }
    match (patterns.dead_end.as_deref(), patterns.no_dead_end) {
        (Some(_), true) => bail!("invalid session config: dead_end and no_dead_end are mutually exclusive"),
        (Some(dead_end), false) => os.patterns.dead_end = Some(whole_line(dead_end)?),
        (None, true) => os.patterns.dead_end = None,
        (None, false) => {}
    }
    Ok(())
}

fn resolve_path(base_dir: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
