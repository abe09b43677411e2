//! Boot Raspberry Pi disk images in an emulator and operate them through
//! their serial console.
//!
//! A session boots an image in the `lukechilds/dockerpi` container, logs in,
//! runs a queue of [`Program`]s (small state machines that type commands
//! when the prompts they wait for appear) and shuts the guest down again.
//!
//! # Architecture
//!
//! ```text
//! docker run ... lukechilds/dockerpi:vm
//!     │ stdout/stderr
//!     ▼
//! reader threads ── Io ──▶ Session (single driver thread)
//!                            ├── Watchdog      reset on every line
//!                            ├── RunningOs     stuck detection, input, status
//!                            └── ProgramQueue  login ◀ programs ◀ shutdown
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use imgboot::{config, docker::DockerPi, status::ConsoleSink};
//!
//! let config = config::load_config("session.toml".as_ref())?;
//! let code = imgboot::boot_and_run(&config, &DockerPi::new()?, Arc::new(ConsoleSink::new(false)))?;
//! ```

pub mod config;
pub mod docker;
pub mod driver;
pub mod error;
pub mod io;
pub mod lock;
pub mod os;
pub mod preflight;
pub mod process;
pub mod program;
pub mod queue;
pub mod session;
pub mod status;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::Result;

pub use config::SessionConfig;
pub use driver::{Phase, RunningOs};
pub use error::SessionError;
pub use io::{Io, IoKind};
pub use os::{Credentials, KnownOs, OperatingSystem, Patterns};
pub use program::{Program, Transition};
pub use queue::ProgramQueue;
pub use session::{Outcome, Session, SessionOptions};
pub use status::{HasStatus, StatusSink};
pub use watchdog::Watchdog;

use crate::lock::ImageLock;
use crate::process::Spawner;

/// Boot the configured image, run its programs and wait for the guest to exit.
///
/// The image stays locked for the whole session. Returns the exit code of
/// the emulator.
pub fn boot_and_run(config: &SessionConfig, spawner: &dyn Spawner, sink: Arc<dyn StatusSink>) -> Result<i32> {
    preflight::check_image(&config.image)?;
    let _lock = ImageLock::acquire(&config.image)?;

    let programs = config.programs()?;
    let name = config
        .name
        .clone()
        .unwrap_or_else(|| docker::container_name_for(&config.image));
    sink.log_line(&format!(
        "Booting {} as {}: {}",
        config.os,
        name,
        program::format_names(&programs)
    ));

    let mut session = Session::start(
        spawner,
        &config.image,
        &name,
        &config.os,
        &config.credentials,
        programs,
        sink.clone(),
        config.options.clone(),
    )?;

    let code = match session.run()? {
        Outcome::Exited(code) => code,
        Outcome::ProgramsDone => {
            sink.log_line(&format!(
                "All programs completed; {} keeps running until it is shut down",
                name
            ));
            session.drain()?
        }
    };
    Ok(code)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::mpsc;

    use super::*;
    use crate::process::Spawned;
    use crate::status::RecordingSink;
    use crate::testing::{fake_process, FakeHandle};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Replays a fixed console transcript.
    struct Replay {
        lines: Vec<&'static str>,
        handle: Mutex<Option<FakeHandle>>,
    }

    impl Spawner for Replay {
        fn spawn(&self, _image: &Path, _name: &str) -> Result<Spawned> {
            let (process, handle) = fake_process();
            *self.handle.lock().unwrap() = Some(handle);
            let (tx, rx) = mpsc::channel();
            for line in &self.lines {
                tx.send(Io::out(*line)).unwrap();
            }
            Ok(Spawned {
                process: Box::new(process),
                output: rx,
            })
        }
    }

    #[test]
    fn test_boot_and_run() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("pi.img");
        std::fs::write(&image, b"").unwrap();
        let config_text = format!(
            "[session]\nimage = {:?}\nos = \"raspberry-pi-lite\"\nname = \"test\"\n\n[[program]]\nname = \"greet\"\ncommands = [\"echo hi\"]\n",
            image.display().to_string()
        );
        let config = config::parse_config(&config_text, temp.path()).unwrap();

        let spawner = Replay {
            lines: vec!["raspberrypi login: ", "Password: ", "pi@raspberrypi:~$ ", "pi@raspberrypi:~$ "],
            handle: Mutex::new(None),
        };
        let sink = Arc::new(RecordingSink::new());
        let code = boot_and_run(&config, &spawner, sink.clone()).unwrap();

        assert_eq!(code, 0);
        let handle = spawner.handle.lock().unwrap().clone().unwrap();
        assert_eq!(handle.inputs(), vec!["pi\r", "raspberry\r", "echo hi\r", "sudo shutdown -h now\r"]);
        assert!(sink.lines()[0].starts_with("Booting Raspberry Pi OS Lite as test: greet"));
        assert!(ImageLock::acquire(&image).is_ok());
    }

    #[test]
    fn test_boot_and_run_missing_image() {
        let temp = TempDir::new().unwrap();
        let config = config::parse_config(
            "[session]\nimage = \"absent.img\"\nos = \"dietpi\"\n",
            temp.path(),
        )
        .unwrap();
        let spawner = Replay {
            lines: vec![],
            handle: Mutex::new(None),
        };
        assert!(boot_and_run(&config, &spawner, Arc::new(RecordingSink::new())).is_err());
        assert!(spawner.handle.lock().unwrap().is_none());
    }
}
