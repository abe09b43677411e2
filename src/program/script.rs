//! Ready-made programs: command scripts, login and shutdown.

use anyhow::{bail, Result};
use regex::Regex;

use super::{transition, Program, Transition};
use crate::os::{Credentials, OperatingSystem, Patterns};

const AWAIT_LOGIN: &str = "awaiting login prompt";
const AWAIT_PASSWORD: &str = "awaiting password prompt";

fn state_name(index: usize, commands: &[String]) -> String {
    let command = commands[index].split_whitespace().next().unwrap_or("");
    format!("{}/{}: {}", index + 1, commands.len(), command)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let half = max_chars / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text
        .chars()
        .rev()
        .take(max_chars - half - 1)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{}…{}", head, tail)
}

/// A program that types `commands` one by one, each once `ready` matches.
///
/// After the last command it waits for one more ready prompt, so the program
/// only completes once the last command has finished. Without commands the
/// program completes on the first line it sees.
pub fn from_commands<S: AsRef<str>>(name: &str, ready: &Regex, commands: &[S]) -> Program {
    let commands: Vec<String> = commands.iter().map(|c| c.as_ref().to_string()).collect();
    let name = name.trim_start_matches(':').trim();

    if commands.is_empty() {
        return Program::new(name, transition(|_, _| None), Vec::new());
    }

    let finish = commands
        .last()
        .map(|last| format!("waiting for {} to finish", truncate(last, 30)))
        .unwrap_or_default();

    let mut states: Vec<(String, Transition)> = Vec::with_capacity(commands.len() + 1);
    for (index, command) in commands.iter().enumerate() {
        let current = state_name(index, &commands);
        let next = if index + 1 < commands.len() {
            state_name(index + 1, &commands)
        } else {
            finish.clone()
        };
        let ready = ready.clone();
        let input = format!("{}\r", command);
        let waiting = current.clone();
        states.push((
            current,
            transition(move |os, line| {
                if ready.is_match(line) {
                    os.enter(&[&input]);
                    Some(next.clone())
                } else {
                    Some(waiting.clone())
                }
            }),
        ));
    }

    let ready = ready.clone();
    let waiting = finish.clone();
    states.push((
        finish,
        transition(move |_, line| {
            if ready.is_match(line) {
                None
            } else {
                Some(waiting.clone())
            }
        }),
    ));

    let entry = state_name(0, &commands);
    Program::new(name, transition(move |_, _| Some(entry.clone())), states)
}

/// Split a labelled setup script into one program per block.
///
/// Blocks are introduced by a `: label` line; the following non-empty lines
/// are the block's commands. Lines before the first label form an unlabelled
/// block named `<name>—<first command>`. Blocks without commands are skipped.
///
/// ```text
/// sudo -i
///
/// : configure SSH port
/// sed -i 's/^\#Port 22$/Port 1234/g' /etc/ssh/sshd_config
///
/// : remove unused DHCP clients
/// apt-get purge -qq -m isc-dhcp-client
/// apt-get autoremove -y -m
/// ```
pub fn from_setup_script(name: &str, ready: &Regex, script: &str) -> Vec<Program> {
    let mut blocks: Vec<(Option<String>, Vec<String>)> = vec![(None, Vec::new())];

    for line in script.lines() {
        let trimmed = line.trim();
        if let Some(label) = trimmed.strip_prefix(':') {
            blocks.push((Some(label.trim().to_string()), Vec::new()));
        } else if !trimmed.is_empty() {
            if let Some((_, commands)) = blocks.last_mut() {
                commands.push(trimmed.to_string());
            }
        }
    }

    blocks
        .into_iter()
        .filter(|(_, commands)| !commands.is_empty())
        .map(|(label, commands)| {
            let program_name = match label {
                Some(label) if !label.is_empty() => label,
                _ => format!("{}—{}", name, commands[0]),
            };
            from_commands(&program_name, ready, &commands)
        })
        .collect()
}

/// Logs in with `credentials`: username at the login prompt, password at
/// the password prompt.
pub fn login(patterns: &Patterns, credentials: &Credentials) -> Program {
    let login_patterns = patterns.clone();
    let username = format!("{}\r", credentials.username);
    let password_patterns = patterns.clone();
    let password = format!("{}\r", credentials.password);

    Program::new(
        "login",
        transition(|_, _| Some(AWAIT_LOGIN.to_string())),
        vec![
            (
                AWAIT_LOGIN.to_string(),
                transition(move |os, line| {
                    if login_patterns.is_login(line) {
                        os.enter(&[&username]);
                        Some(AWAIT_PASSWORD.to_string())
                    } else {
                        Some(AWAIT_LOGIN.to_string())
                    }
                }),
            ),
            (
                AWAIT_PASSWORD.to_string(),
                transition(move |os, line| {
                    if password_patterns.is_password(line) {
                        os.enter_secret(&password);
                        os.feedback("Logged in");
                        None
                    } else {
                        Some(AWAIT_PASSWORD.to_string())
                    }
                }),
            ),
        ],
    )
}

/// Types the shutdown command as soon as it becomes the active program.
pub fn shutdown() -> Program {
    Program::new(
        "shutdown",
        transition(|os, _| {
            os.shutdown();
            None
        }),
        Vec::new(),
    )
}

/// A script of `commands` for `os`. Empty scripts are rejected.
pub fn compile_script<S: AsRef<str>>(os: &OperatingSystem, name: &str, commands: &[S]) -> Result<Program> {
    if commands.iter().all(|c| c.as_ref().trim().is_empty()) {
        bail!("script '{}' must not be empty", name);
    }
    Ok(from_commands(name, &os.patterns.ready, commands))
}

/// A labelled setup script for `os`, one program per block.
pub fn compile_setup_script(os: &OperatingSystem, name: &str, script: &str) -> Result<Vec<Program>> {
    let programs = from_setup_script(name, &os.patterns.ready, script);
    if programs.is_empty() {
        bail!("setup script '{}' contains no commands", name);
    }
    Ok(programs)
}
