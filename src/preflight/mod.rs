//! Preflight checks before booting an image.
//!
//! Validates that the host can run the emulator container. This prevents
//! cryptic errors halfway through a boot.
//!
//! # Example
//!
//! ```rust
//! use imgboot::preflight::{command_exists, check_required_tools};
//!
//! // Check a single command
//! if !command_exists("docker") {
//!     println!("docker not installed");
//! }
//!
//! // Check multiple tools
//! let tools = &[("docker", "docker.io")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Required host tools for booting images.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[("docker", "docker.io")];

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check that the Docker daemon answers.
pub fn check_docker_daemon() -> Result<()> {
    let docker = which::which("docker").context("docker not found in PATH")?;
    let output = Command::new(&docker)
        .args(["info", "--format", "{{.ServerVersion}}"])
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to run {} info", docker.display()))?;
    if !output.status.success() {
        bail!(
            "Docker daemon not reachable: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Check that `image` is a regular, writable file.
pub fn check_image(image: &Path) -> Result<()> {
    let meta = std::fs::metadata(image)
        .with_context(|| format!("Image not found at {}", image.display()))?;
    if !meta.is_file() {
        bail!("Image {} is not a regular file", image.display());
    }
    if meta.permissions().readonly() {
        bail!("Image {} is read-only; the guest needs to write to it", image.display());
    }
    Ok(())
}

/// Check everything needed to boot: host tools and the Docker daemon.
pub fn check_host() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)?;
    check_docker_daemon()
}
