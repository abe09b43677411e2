//! Boot-and-run: feed guest output to programs until the guest is done.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::driver::{Phase, RunningOs};
use crate::error::SessionError;
use crate::io::Io;
use crate::os::{Credentials, OperatingSystem, Patterns};
use crate::process::{Spawned, Spawner};
use crate::program::{self, Program};
use crate::queue::ProgramQueue;
use crate::status::StatusSink;
use crate::watchdog::Watchdog;

/// How a session behaves around the user's programs.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Log in before the first program. Ignored for empty credentials.
    pub auto_login: bool,
    /// Shut the guest down once all programs completed.
    pub auto_shutdown: bool,
    /// Inactivity period after which the watchdog fires; `None` disables it.
    pub watchdog_timeout: Option<Duration>,
    /// Kill the guest when the watchdog fires instead of only warning.
    pub kill_on_timeout: bool,
    /// How long to wait for output before checking whether the guest still lives.
    pub poll: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_login: true,
            auto_shutdown: true,
            watchdog_timeout: Some(Duration::from_secs(5 * 60)),
            kill_on_timeout: false,
            poll: Duration::from_millis(100),
        }
    }
}

/// Result of [`Session::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The guest process exited with this code.
    Exited(i32),
    /// All programs completed and no shutdown was requested; the guest is still running.
    ProgramsDone,
}

/// A guest process, its output and the programs operating it.
pub struct Session {
    os: RunningOs,
    queue: ProgramQueue,
    output: Receiver<Io>,
    options: SessionOptions,
    patterns: Patterns,
    username: String,
    login_pending: bool,
    /// Set between entering the password and the first ready prompt.
    verifying_login: bool,
}

impl Session {
    pub fn new(
        spawned: Spawned,
        descriptor: &OperatingSystem,
        credentials: &Credentials,
        programs: Vec<Program>,
        sink: Arc<dyn StatusSink>,
        options: SessionOptions,
    ) -> Self {
        let mut os = RunningOs::new(spawned.process, descriptor, sink);
        let mut queue = ProgramQueue::from(programs);

        let login_pending = options.auto_login && !credentials.is_empty();
        if login_pending {
            queue.push_front(program::login(&descriptor.patterns, credentials));
            os.advance(Phase::LoggingIn);
        } else {
            os.advance(Phase::RunningPrograms);
        }
        if options.auto_shutdown {
            queue.push_back(program::shutdown());
        }

        Self {
            os,
            queue,
            output: spawned.output,
            options,
            patterns: descriptor.patterns.clone(),
            username: credentials.username.clone(),
            login_pending,
            verifying_login: false,
        }
    }

    /// Spawn a guest for `image` and wrap it in a session.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        spawner: &dyn Spawner,
        image: &Path,
        name: &str,
        descriptor: &OperatingSystem,
        credentials: &Credentials,
        programs: Vec<Program>,
        sink: Arc<dyn StatusSink>,
        options: SessionOptions,
    ) -> Result<Self> {
        info!("booting {} from {}", descriptor, image.display());
        let spawned = spawner
            .spawn(image, name)
            .with_context(|| format!("Failed to start {} for {}", name, image.display()))?;
        Ok(Self::new(spawned, descriptor, credentials, programs, sink, options))
    }

    pub fn driver(&self) -> &RunningOs {
        &self.os
    }

    pub fn driver_mut(&mut self) -> &mut RunningOs {
        &mut self.os
    }

    pub fn queue(&self) -> &ProgramQueue {
        &self.queue
    }

    /// Process output until the guest exits or, without auto shutdown, until
    /// all programs completed.
    ///
    /// A fatal error leaves the guest stopped.
    pub fn run(&mut self) -> Result<Outcome, SessionError> {
        let timed_out = Arc::new(AtomicBool::new(false));
        let mut watchdog = self.options.watchdog_timeout.map(|timeout| {
            let flag = Arc::clone(&timed_out);
            Watchdog::start(timeout, !self.options.kill_on_timeout, move || {
                flag.store(true, Ordering::SeqCst);
            })
        });

        let result = self.run_with(watchdog.as_ref(), &timed_out);

        if let Some(watchdog) = watchdog.as_mut() {
            watchdog.stop();
        }
        if result.is_err() && self.os.is_alive() {
            if let Err(e) = self.os.kill() {
                warn!("killing the guest after a failed session failed: {}", e);
            }
        }
        result
    }

    fn run_with(&mut self, watchdog: Option<&Watchdog>, timed_out: &AtomicBool) -> Result<Outcome, SessionError> {
        loop {
            if let Some(outcome) = self.programs_done() {
                return Ok(outcome);
            }
            if timed_out.swap(false, Ordering::SeqCst) {
                self.on_timeout(watchdog)?;
            }

            match self.output.recv_timeout(self.options.poll) {
                Ok(io) => {
                    if !io.is_blank() {
                        if let Some(watchdog) = watchdog {
                            watchdog.reset();
                        }
                    }
                    if let Some(outcome) = self.handle(&io)? {
                        return Ok(outcome);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !self.os.is_alive() {
                        return self.exited();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return self.exited(),
            }
        }
    }

    fn on_timeout(&mut self, watchdog: Option<&Watchdog>) -> Result<(), SessionError> {
        let timeout = watchdog.map(Watchdog::timeout).unwrap_or_default();
        if !self.options.kill_on_timeout {
            self.os
                .negative_feedback(&format!("No output for {:?} while {}", timeout, self.os.phase()));
            return Ok(());
        }
        self.os.negative_feedback(&format!("No output for {:?}; killing the emulator", timeout));
        self.os.kill()?;
        Err(SessionError::Unresponsive { timeout })
    }

    /// Process a single line of output.
    ///
    /// Returns [`Outcome::ProgramsDone`] once the last program completed
    /// without a shutdown being underway.
    pub fn handle(&mut self, io: &Io) -> Result<Option<Outcome>, SessionError> {
        if io.is_process_output() {
            self.os.check_stuck(io)?;
        }
        self.os.status(io, &self.queue.pending());

        if !io.is_process_output() {
            return Ok(None);
        }
        if self.verifying_login {
            self.verify_login(io.unformatted())?;
        }
        if self.queue.is_empty() {
            return Ok(self.programs_done());
        }

        let completed = self.queue.feed(&mut self.os, io)?;
        if completed.is_empty() {
            return Ok(None);
        }
        debug!("completed {:?}", completed);

        if self.login_pending {
            self.login_pending = false;
            self.verifying_login = true;
            if self.os.phase() == Phase::LoggingIn {
                self.os.advance(Phase::RunningPrograms);
            }
        }

        Ok(self.programs_done())
    }

    /// The guest answers a rejected login with a complaint and a fresh login
    /// prompt. Either one before the first ready prompt fails the session.
    fn verify_login(&mut self, line: &str) -> Result<(), SessionError> {
        if self.patterns.is_ready(line) {
            self.verifying_login = false;
            return Ok(());
        }
        if self.patterns.is_login(line) || line.to_ascii_lowercase().contains("login incorrect") {
            self.os
                .negative_feedback(&format!("Login as '{}' was rejected", self.username));
            return Err(SessionError::IncorrectPassword {
                username: self.username.clone(),
            });
        }
        Ok(())
    }

    /// [`Outcome::ProgramsDone`] when nothing is left to run and no shutdown
    /// is underway, including a session that started with an empty queue.
    fn programs_done(&self) -> Option<Outcome> {
        if !self.queue.is_empty() || self.os.is_shutting_down() {
            return None;
        }
        self.os.feedback("All programs completed");
        Some(Outcome::ProgramsDone)
    }

    /// Report remaining output until the guest exits, e.g. after a manual
    /// [`RunningOs::shutdown`] following [`Outcome::ProgramsDone`].
    pub fn drain(&mut self) -> Result<i32, SessionError> {
        loop {
            match self.output.recv_timeout(self.options.poll) {
                Ok(io) => {
                    if io.is_process_output() {
                        self.os.check_stuck(&io)?;
                    }
                    self.os.status(&io, &[]);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !self.os.is_alive() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(self.os.wait_for_exit()?)
    }

    fn exited(&mut self) -> Result<Outcome, SessionError> {
        let code = self.os.wait_for_exit()?;
        if !self.queue.is_empty() {
            warn!(
                "guest exited with {} program(s) pending: {}",
                self.queue.len(),
                self.queue
                    .pending()
                    .iter()
                    .map(|p| p.status())
                    .collect::<Vec<_>>()
                    .join(" ◀ ")
            );
        }
        info!("guest exited with code {}", code);
        Ok(Outcome::Exited(code))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{self, Sender};

    use super::*;
    use crate::os::KnownOs;
    use crate::status::RecordingSink;
    use crate::testing::{fake_process, FakeHandle};

    fn session(
        programs: Vec<Program>,
        options: SessionOptions,
    ) -> (Session, Sender<Io>, FakeHandle, Arc<RecordingSink>) {
        let descriptor = KnownOs::RaspberryPiLite.descriptor();
        let (process, fake) = fake_process();
        let (tx, rx) = mpsc::channel();
        let sink = Arc::new(RecordingSink::new());
        let spawned = Spawned {
            process: Box::new(process),
            output: rx,
        };
        let session = Session::new(
            spawned,
            &descriptor,
            &Credentials::new("pi", "raspberry"),
            programs,
            sink.clone(),
            options,
        );
        (session, tx, fake, sink)
    }

    fn quick() -> SessionOptions {
        SessionOptions {
            watchdog_timeout: None,
            poll: Duration::from_millis(10),
            ..SessionOptions::default()
        }
    }

    fn echo_hi() -> Program {
        program::from_commands("script", &KnownOs::RaspberryPiLite.descriptor().patterns.ready, &["echo hi"])
    }

    #[test]
    fn test_boot_scenario() {
        let (mut session, tx, fake, _sink) = session(vec![echo_hi()], quick());
        assert_eq!(session.driver().phase(), Phase::LoggingIn);
        for line in ["pi login: ", "Password: ", "pi@host:~$ ", "pi@host:~$ "] {
            tx.send(Io::out(line)).unwrap();
        }
        drop(tx);

        assert_eq!(session.run().unwrap(), Outcome::Exited(0));
        assert_eq!(
            fake.inputs(),
            vec!["pi\r", "raspberry\r", "echo hi\r", "sudo shutdown -h now\r"]
        );
        assert!(session.queue().is_empty());
        assert_eq!(session.driver().phase(), Phase::Terminated);
    }

    #[test]
    fn test_phases_follow_programs() {
        let (mut session, _tx, _fake, _sink) = session(vec![echo_hi()], quick());
        session.handle(&Io::out("raspberrypi login: ")).unwrap();
        assert_eq!(session.driver().phase(), Phase::LoggingIn);
        session.handle(&Io::out("Password: ")).unwrap();
        assert_eq!(session.driver().phase(), Phase::RunningPrograms);
        session.handle(&Io::out("pi@raspberrypi:~$ ")).unwrap();
        session.handle(&Io::out("pi@raspberrypi:~$ ")).unwrap();
        assert_eq!(session.driver().phase(), Phase::ShuttingDown);
    }

    #[test]
    fn test_programs_done_without_auto_shutdown() {
        let options = SessionOptions {
            auto_shutdown: false,
            ..quick()
        };
        let (mut session, tx, fake, _sink) = session(vec![], options);
        tx.send(Io::out("raspberrypi login: ")).unwrap();
        tx.send(Io::out("Password: ")).unwrap();

        assert_eq!(session.run().unwrap(), Outcome::ProgramsDone);
        assert!(session.driver_mut().is_alive());
        assert!(!session.driver().is_shutting_down());
        assert_eq!(fake.inputs(), vec!["pi\r", "raspberry\r"]);

        session.driver_mut().shutdown();
        tx.send(Io::out("[  OK  ] Reached target Power-Off.")).unwrap();
        drop(tx);
        assert_eq!(session.drain().unwrap(), 0);
    }

    #[test]
    fn test_empty_queue_is_done_immediately() {
        let options = SessionOptions {
            auto_login: false,
            auto_shutdown: false,
            ..quick()
        };
        let (mut session, _tx, fake, sink) = session(vec![], options);

        assert_eq!(session.run().unwrap(), Outcome::ProgramsDone);
        assert!(fake.inputs().is_empty());
        assert!(session.driver_mut().is_alive());
        assert!(sink.lines().iter().any(|l| l.contains("All programs completed")));
    }

    #[test]
    fn test_rejected_login_fails() {
        let (mut session, tx, fake, _sink) = session(vec![echo_hi()], quick());
        for line in ["raspberrypi login: ", "Password: ", "", "Login incorrect", "raspberrypi login: "] {
            tx.send(Io::out(line)).unwrap();
        }

        let err = session.run().unwrap_err();
        assert!(matches!(err, SessionError::IncorrectPassword { ref username } if username == "pi"));
        assert!(fake.killed());
        assert_eq!(fake.inputs(), vec!["pi\r", "raspberry\r"]);
    }

    #[test]
    fn test_fresh_login_prompt_after_password_fails() {
        let (mut session, _tx, _fake, _sink) = session(vec![echo_hi()], quick());
        session.handle(&Io::out("raspberrypi login: ")).unwrap();
        session.handle(&Io::out("Password: ")).unwrap();
        let err = session.handle(&Io::out("raspberrypi login: ")).unwrap_err();
        assert!(matches!(err, SessionError::IncorrectPassword { .. }));
    }

    #[test]
    fn test_login_banner_is_accepted() {
        let (mut session, _tx, fake, _sink) = session(vec![echo_hi()], quick());
        for line in [
            "raspberrypi login: ",
            "Password: ",
            "Last login: Fri May  7 12:00:00 UTC 2021 on ttyAMA0",
            "Linux raspberrypi 5.10.17-v7+ #1414 SMP Fri Apr 30 13:18:35 BST 2021 armv7l",
            "pi@raspberrypi:~$ ",
        ] {
            session.handle(&Io::out(line)).unwrap();
        }
        // Once logged in, a login prompt is only output.
        session.handle(&Io::out("raspberrypi login: ")).unwrap();
        assert_eq!(fake.inputs(), vec!["pi\r", "raspberry\r", "echo hi\r"]);
    }

    #[test]
    fn test_meta_lines_are_not_fed() {
        let (mut session, _tx, fake, sink) = session(vec![], quick());
        session.handle(&Io::meta("raspberrypi login: ")).unwrap();
        assert!(fake.inputs().is_empty());
        assert_eq!(sink.statuses().len(), 1);
    }

    #[test]
    fn test_stuck_aborts() {
        let (mut session, tx, fake, _sink) = session(vec![echo_hi()], quick());
        tx.send(Io::out("[    3.0] systemd[1]: Starting")).unwrap();
        tx.send(Io::out("You are in emergency mode. After logging in, type \"journalctl -xb\"")).unwrap();

        let err = session.run().unwrap_err();
        assert!(matches!(err, SessionError::StuckSession { .. }));
        assert!(fake.destroyed());
        assert_eq!(session.driver().phase(), Phase::Terminated);
    }

    #[test]
    fn test_unknown_state_kills_guest() {
        let broken = Program::new(
            "broken",
            program::transition(|_, _| Some("nowhere".to_string())),
            vec![],
        );
        let options = SessionOptions {
            auto_login: false,
            ..quick()
        };
        let (mut session, tx, fake, _sink) = session(vec![broken], options);
        tx.send(Io::out("anything")).unwrap();

        let err = session.run().unwrap_err();
        assert!(matches!(err, SessionError::UnknownState { .. }));
        assert!(fake.killed());
    }

    #[test]
    fn test_unresponsive_guest_is_killed() {
        let options = SessionOptions {
            watchdog_timeout: Some(Duration::from_millis(50)),
            kill_on_timeout: true,
            ..quick()
        };
        let (mut session, _tx, fake, _sink) = session(vec![], options);

        let err = session.run().unwrap_err();
        assert!(matches!(err, SessionError::Unresponsive { .. }));
        assert!(fake.killed());
    }

    #[test]
    fn test_output_postpones_watchdog() {
        let options = SessionOptions {
            watchdog_timeout: Some(Duration::from_millis(100)),
            kill_on_timeout: true,
            ..quick()
        };
        let (mut session, tx, fake, _sink) = session(vec![], options);
        let feeder = std::thread::spawn(move || {
            for i in 0..10 {
                std::thread::sleep(Duration::from_millis(30));
                tx.send(Io::out(format!("[   {}.0] systemd[1]: Starting", i))).unwrap();
            }
            drop(tx);
        });

        assert_eq!(session.run().unwrap(), Outcome::Exited(0));
        feeder.join().unwrap();
        assert!(!fake.killed());
    }

    #[test]
    fn test_timeout_without_kill_only_warns() {
        let options = SessionOptions {
            watchdog_timeout: Some(Duration::from_millis(30)),
            kill_on_timeout: false,
            ..quick()
        };
        let (mut session, tx, fake, sink) = session(vec![], options);
        let feeder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            drop(tx);
        });

        assert_eq!(session.run().unwrap(), Outcome::Exited(0));
        feeder.join().unwrap();
        assert!(!fake.killed());
        assert!(sink.lines().iter().any(|l| l.contains("No output for")));
    }

    #[test]
    fn test_exit_while_logging_in() {
        let (mut session, tx, _fake, _sink) = session(vec![echo_hi()], quick());
        tx.send(Io::out("raspberrypi login: ")).unwrap();
        drop(tx);
        assert_eq!(session.run().unwrap(), Outcome::Exited(0));
        assert_eq!(session.queue().len(), 3);
    }

    #[test]
    fn test_empty_credentials_skip_login() {
        let descriptor = KnownOs::RiscOs.descriptor();
        let (process, fake) = fake_process();
        let (_tx, rx) = mpsc::channel();
        let mut session = Session::new(
            Spawned {
                process: Box::new(process),
                output: rx,
            },
            &descriptor,
            &Credentials::default(),
            vec![],
            Arc::new(RecordingSink::new()),
            quick(),
        );
        assert_eq!(session.driver().phase(), Phase::RunningPrograms);
        assert_eq!(session.queue().len(), 1);
        session.handle(&Io::out("*")).unwrap();
        assert_eq!(fake.inputs(), vec!["sudo shutdown -h now\r"]);
    }
}
