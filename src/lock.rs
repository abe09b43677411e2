//! Exclusive use of a disk image.
//!
//! Two emulators writing the same raw image corrupt it, so a session holds
//! an advisory lock on `<image>.lock` for as long as the guest runs.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Held while an image is in use. Released on drop.
///
/// The lock file stays on disk so every holder locks the same inode.
#[derive(Debug)]
pub struct ImageLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl ImageLock {
    /// Lock `image`, failing immediately if another process holds it.
    pub fn acquire(image: &Path) -> Result<Self> {
        let path = lock_path(image);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            drop(file);
            return Err(anyhow::anyhow!(
                "Image {} is in use by another process (lock: {})",
                image.display(),
                path.display()
            ));
        }

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}
