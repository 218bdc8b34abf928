//! Exclusive claim deciding which process is primary.
//!
//! The claim is an advisory `flock(2)` on `<runtime_dir>/<handle>.lock`.
//! The kernel releases the lock when the owning process exits for any
//! reason, so a crashed primary never blocks a future election. Locks
//! belong to the open file description, which means two opens within one
//! process also exclude each other.
//!
//! The lock file is never unlinked. Removing it while another process has
//! it open would let that process lock an orphaned inode and become a
//! second primary.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use guard_core::{ApplicationHandle, DomainError, InstanceRole};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors acquiring or releasing the claim.
#[derive(Error, Debug)]
pub enum ClaimError {
    /// The handle cannot name a lock file.
    #[error(transparent)]
    InvalidHandle(#[from] DomainError),

    /// The runtime directory could not be created.
    #[error("Failed to create runtime directory {}: {source}", path.display())]
    RuntimeDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The lock file could not be opened or locked.
    #[error("Failed to lock {}: {source}", path.display())]
    Os {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of [`ExclusiveClaim::acquire`].
///
/// A primary claim keeps the locked file open for as long as it lives.
/// A secondary claim holds nothing.
#[derive(Debug)]
pub struct ExclusiveClaim {
    path: PathBuf,
    role: InstanceRole,
    file: Option<File>,
}

impl ExclusiveClaim {
    /// Attempts to become primary for `handle`.
    ///
    /// Never blocks: the lock is taken with `LOCK_NB`, and a lock held by
    /// someone else yields [`InstanceRole::Secondary`].
    ///
    /// # Errors
    ///
    /// - `ClaimError::RuntimeDir` if `runtime_dir` cannot be created
    /// - `ClaimError::Os` if the lock file cannot be opened or locked for a
    ///   reason other than contention
    pub fn acquire(runtime_dir: &Path, handle: &ApplicationHandle) -> Result<Self, ClaimError> {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(runtime_dir)
            .map_err(|source| ClaimError::RuntimeDir {
                path: runtime_dir.to_path_buf(),
                source,
            })?;

        let path = runtime_dir.join(handle.lock_file_name());
        let os_err = |source| ClaimError::Os {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .open(&path)
            .map_err(os_err)?;

        if !try_lock_exclusive(&file).map_err(os_err)? {
            debug!(handle = %handle, lock = %path.display(), "Claim held by another process");
            return Ok(Self {
                path,
                role: InstanceRole::Secondary,
                file: None,
            });
        }

        if let Err(e) = write_pid(&mut file, std::process::id()) {
            warn!(lock = %path.display(), error = %e, "Failed to record pid in lock file");
        }

        info!(handle = %handle, lock = %path.display(), "Acquired exclusive claim");
        Ok(Self {
            path,
            role: InstanceRole::Primary,
            file: Some(file),
        })
    }

    /// Role decided by this claim.
    pub fn role(&self) -> InstanceRole {
        self.role
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid recorded by the current primary, if any.
    pub fn holder_pid(&self) -> Option<u32> {
        read_pid_file(&self.path)
    }

    /// Releases the claim.
    ///
    /// Clears the recorded pid and unlocks. Dropping the claim also
    /// unlocks (the file descriptor closes); this variant reports errors.
    pub fn release(mut self) -> Result<(), ClaimError> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        let os_err = |source| ClaimError::Os {
            path: self.path.clone(),
            source,
        };

        file.set_len(0).map_err(os_err)?;
        FileExt::unlock(&file).map_err(os_err)?;

        info!(lock = %self.path.display(), "Released exclusive claim");
        Ok(())
    }
}

/// Reads the primary's pid for `handle` without taking the claim.
pub fn read_holder_pid(runtime_dir: &Path, handle: &ApplicationHandle) -> Option<u32> {
    read_pid_file(&runtime_dir.join(handle.lock_file_name()))
}

/// Returns `Ok(true)` when the lock was taken, `Ok(false)` on contention.
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    match FileExt::try_lock_exclusive(file) {
        Ok(()) => Ok(true),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(false),
        Err(e) => Err(e),
    }
}

fn write_pid(file: &mut File, pid: u32) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{pid}")?;
    file.flush()
}

fn read_pid_file(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}
