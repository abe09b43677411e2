//! Raspberry Pi emulation in Docker.
//!
//! Provides `DockerRunBuilder` for constructing the `docker run` command and
//! `DockerPi`, a [`Spawner`] booting images in the `lukechilds/dockerpi`
//! container with the serial console attached to stdio.

use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::io::{Io, IoKind, LineAssembler};
use crate::process::{GuestProcess, Spawned, Spawner};

/// Emulator image booting `/sdcard/filesystem.img`.
pub const DOCKERPI_IMAGE: &str = "lukechilds/dockerpi:vm";

/// Where the emulator expects the disk image.
pub const GUEST_IMAGE_PATH: &str = "/sdcard/filesystem.img";

/// How long an unterminated line may sit before it is delivered anyway.
/// Prompts like `login: ` never end in a newline.
pub const DEFAULT_IDLE_FLUSH: Duration = Duration::from_millis(250);

/// Builder for `docker run` commands.
#[derive(Debug, Clone)]
pub struct DockerRunBuilder {
    docker: PathBuf,
    name: String,
    image: PathBuf,
    docker_image: String,
    remove: bool,
}

impl DockerRunBuilder {
    pub fn new(docker: &Path, name: &str, image: &Path) -> Self {
        Self {
            docker: docker.to_path_buf(),
            name: name.to_string(),
            image: image.to_path_buf(),
            docker_image: DOCKERPI_IMAGE.to_string(),
            remove: true,
        }
    }

    pub fn docker_image(mut self, docker_image: &str) -> Self {
        self.docker_image = docker_image.to_string();
        self
    }

    /// Keep the container after it exited, e.g. to inspect its logs.
    pub fn keep(mut self) -> Self {
        self.remove = false;
        self
    }

    pub fn build(self) -> Command {
        let mut cmd = Command::new(&self.docker);
        cmd.args(["run", "--name", &self.name]);

        if self.remove {
            cmd.arg("--rm");
        }

        // Serial console on stdin/stdout, no TTY so output stays line based
        cmd.arg("-i");

        cmd.args([
            "--volume",
            &format!("{}:{}", self.image.display(), GUEST_IMAGE_PATH),
        ]);

        cmd.arg(&self.docker_image);
        cmd
    }
}

/// Docker container name for `image`: its file stem plus a random suffix.
pub fn container_name_for(image: &Path) -> String {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    name = name.trim_start_matches(|c: char| !c.is_ascii_alphanumeric()).to_string();
    if name.is_empty() {
        name = "imgboot".to_string();
    }

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    format!("{}-{}", name, suffix)
}

/// Spawns `lukechilds/dockerpi` containers.
#[derive(Debug, Clone)]
pub struct DockerPi {
    docker: PathBuf,
    docker_image: String,
    idle_flush: Duration,
}

impl DockerPi {
    /// Locate `docker` on the `PATH`.
    pub fn new() -> Result<Self> {
        let docker = which::which("docker").context("docker not found in PATH")?;
        Ok(Self::with_binary(docker))
    }

    pub fn with_binary(docker: PathBuf) -> Self {
        Self {
            docker,
            docker_image: DOCKERPI_IMAGE.to_string(),
            idle_flush: DEFAULT_IDLE_FLUSH,
        }
    }

    pub fn docker_image(mut self, docker_image: &str) -> Self {
        self.docker_image = docker_image.to_string();
        self
    }

    pub fn idle_flush(mut self, idle_flush: Duration) -> Self {
        self.idle_flush = idle_flush;
        self
    }

    /// Remove a leftover container of the same name. Failures are ignored.
    fn remove_stale(&self, name: &str) {
        let status = Command::new(&self.docker)
            .args(["rm", "--force", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = status {
            debug!("removing stale container {} failed: {}", name, e);
        }
    }
}

impl Spawner for DockerPi {
    fn spawn(&self, image: &Path, name: &str) -> Result<Spawned> {
        let image = image
            .canonicalize()
            .with_context(|| format!("Image not found at {}", image.display()))?;

        self.remove_stale(name);

        let mut cmd = DockerRunBuilder::new(&self.docker, name, &image)
            .docker_image(&self.docker_image)
            .build();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("spawning {:?}", cmd);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.docker.display()))?;
        let stdout = child.stdout.take().context("Failed to capture stdout")?;
        let stderr = child.stderr.take().context("Failed to capture stderr")?;
        let stdin = child.stdin.take().context("Failed to capture stdin")?;

        let (tx, rx) = mpsc::channel();
        spawn_reader(stdout, IoKind::Out, tx.clone(), self.idle_flush);
        spawn_reader(stderr, IoKind::Err, tx, self.idle_flush);

        let process = DockerPiProcess {
            docker: self.docker.clone(),
            name: name.to_string(),
            child,
            stdin: Some(stdin),
        };
        Ok(Spawned {
            process: Box::new(process),
            output: rx,
        })
    }
}

/// Read `source` in chunks and deliver its lines as `kind` over `tx`.
fn spawn_reader<R>(mut source: R, kind: IoKind, tx: Sender<Io>, idle_flush: Duration)
where
    R: Read + Send + 'static,
{
    let (chunks_tx, chunks_rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if chunks_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("reading {} failed: {}", kind, e);
                    break;
                }
            }
        }
    });
    thread::spawn(move || assemble(chunks_rx, kind, tx, idle_flush));
}

/// Turn raw chunks into lines. A partial line is delivered once no more
/// bytes arrived for `idle_flush`, and when the source closes.
fn assemble(chunks: Receiver<Vec<u8>>, kind: IoKind, tx: Sender<Io>, idle_flush: Duration) {
    let mut assembler = LineAssembler::new();
    loop {
        match chunks.recv_timeout(idle_flush) {
            Ok(chunk) => {
                for line in assembler.feed(&chunk) {
                    if tx.send(Io::new(kind, line)).is_err() {
                        return;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if let Some(partial) = assembler.flush_partial() {
                    if tx.send(Io::new(kind, partial)).is_err() {
                        return;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Some(partial) = assembler.flush_partial() {
                    let _ = tx.send(Io::new(kind, partial));
                }
                return;
            }
        }
    }
}

/// A running `docker run` of the emulator.
pub struct DockerPiProcess {
    docker: PathBuf,
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl DockerPiProcess {
    fn docker(&self, args: &[&str]) -> io::Result<()> {
        let output = Command::new(&self.docker).args(args).output()?;
        if !output.status.success() {
            debug!(
                "docker {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl GuestProcess for DockerPiProcess {
    fn write_input(&mut self, input: &str) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin already closed"))?;
        stdin.write_all(input.as_bytes())?;
        stdin.flush()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn destroy(&mut self) -> io::Result<()> {
        let name = self.name.clone();
        self.docker(&["stop", &name])
    }

    /// Kill the local client, then remove the container. Both steps run even
    /// if one fails; the first failure is returned.
    fn destroy_forcibly(&mut self) -> io::Result<()> {
        let killed = match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        };
        let name = self.name.clone();
        let removed = self.docker(&["rm", "--force", &name]);
        killed.and(removed)
    }

    fn wait_for_exit(&mut self) -> io::Result<i32> {
        self.stdin.take();
        let status = self.child.wait()?;
        Ok(status.code().unwrap_or(-1))
    }

    fn describe(&self) -> String {
        format!("container {}", self.name)
    }
}
