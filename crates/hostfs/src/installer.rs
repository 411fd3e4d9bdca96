// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Subprocess invocation of the external `zookeeper-deploy` installer
//! contract: an executable dropped at `opt/<rpm>/bin/zookeeper-deploy`
//! that this crate never inspects beyond running it and checking its
//! exit status.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("running installer {0:?}")]
    Spawn(PathBuf, #[source] std::io::Error),
    #[error("installer {0:?} exited with {1}")]
    NonZero(PathBuf, ExitStatus),
}

/// Runs `script` with `args`, failing if the script is missing or exits
/// non-zero. Inherits stdio so the installer's own diagnostics reach the
/// agent's log.
pub fn run_installer(script: &Path, args: &[String]) -> Result<(), InstallerError> {
    let status = Command::new(script)
        .args(args)
        .status()
        .map_err(|e| InstallerError::Spawn(script.to_path_buf(), e))?;

    if !status.success() {
        return Err(InstallerError::NonZero(script.to_path_buf(), status));
    }

    Ok(())
}
