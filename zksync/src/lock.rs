// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Filesystem lock plus "tombstone" file guaranteeing at-most-one
//! driver per host machine, per `spec.md` §4.6. Mirrors
//! `moss::installation::lockfile`'s `flock(2)`-backed guard, but this
//! one refuses immediately instead of blocking: a second driver
//! starting while one is already running should exit, not queue.

use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use fs_err::{self as fs, File};
use nix::fcntl::{flock, FlockArg};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io at {0:?}")]
    Io(PathBuf, #[source] io::Error),
    #[error("another sync driver is already running")]
    AlreadyRunning,
    #[error("obtaining exclusive file lock")]
    Flock(#[from] nix::Error),
}

/// Held for the lifetime of one sync attempt. Dropping releases the
/// `flock(2)` lock; the lock file itself is left in place for reuse.
pub struct DriverLock(#[allow(dead_code)] File);

pub fn acquire(lock_path: &Path) -> Result<DriverLock, Error> {
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| Error::Io(lock_path.to_path_buf(), e))?;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(DriverLock(file)),
        Err(nix::errno::Errno::EWOULDBLOCK) => Err(Error::AlreadyRunning),
        Err(e) => Err(e.into()),
    }
}

/// Records the reason the last run failed, for a human to inspect.
/// Overwritten on every failing run; left untouched (not deleted) on
/// success, since the file's absence vs. presence is read by an
/// operator, not by this driver.
pub fn write_tombstone(tombstone_path: &Path, reason: &str) -> Result<(), Error> {
    fs::write(tombstone_path, format!("{reason}\n")).map_err(|e| Error::Io(tombstone_path.to_path_buf(), e))
}

pub fn clear_tombstone(tombstone_path: &Path) -> Result<(), Error> {
    match fs::remove_file(tombstone_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(tombstone_path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn second_acquire_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.lock");
        let _first = acquire(&path).unwrap();
        let second = acquire(&path);
        assert!(matches!(second, Err(Error::AlreadyRunning)));
    }

    #[test]
    fn tombstone_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.tombstone");
        write_tombstone(&path, "boom").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "boom\n");
        clear_tombstone(&path).unwrap();
        assert!(!path.exists());
    }
}
