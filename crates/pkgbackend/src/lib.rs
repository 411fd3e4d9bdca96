// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Installs, removes and version-queries deployable units, whether they
//! come from the system package manager or a VCS checkout.

use std::path::Path;
use std::process::{Command, ExitStatus};

use thiserror::Error;

pub mod vcs;
pub mod yum;

pub use vcs::{Vcs, VcsRegistry};
pub use yum::Yum;

#[derive(Debug, Error)]
pub enum Error {
    #[error("running {0:?}")]
    Spawn(String, #[source] std::io::Error),
    #[error("{0:?} exited with {1}")]
    NonZero(String, ExitStatus),
    #[error("installing {rpm_name}: wanted {wanted}, got {got:?}")]
    InstallFailed {
        rpm_name: String,
        wanted: String,
        got: Option<String>,
    },
    #[error("malformed VCS version string {0:?}")]
    MalformedVersion(String),
    #[error(transparent)]
    Installer(#[from] hostfs::InstallerError),
    #[error("io at {0:?}")]
    Io(std::path::PathBuf, #[source] std::io::Error),
}

/// A versioned deployable unit: either a package-manager name (queried
/// and installed via [`PackageManager`]), or a VCS URL whose scheme
/// selects a [`Vcs`] backend.
pub trait PackageManager: Send + Sync {
    /// `None` if not installed, or if the install directory is a VCS
    /// checkout (which has no package-manager version).
    fn rpm_version(&self, rpm_name: &str) -> Result<Option<String>, Error>;

    /// Installs `rpm_name` at `version` (or any version, if `None`).
    /// `cleaned` is a single reconcile-cycle flag owned by the caller:
    /// the first call with `cleaned == false` runs a `clean all` first
    /// and flips it true, so later calls in the same cycle skip it.
    fn install(&self, rpm_name: &str, version: Option<&str>, cleaned: &mut bool) -> Result<(), Error>;

    fn remove(&self, rpm_name: &str) -> Result<(), Error>;
}

pub(crate) fn run(program: &str, args: &[&str]) -> Result<(), Error> {
    let label = || format!("{program} {}", args.join(" "));
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|e| Error::Spawn(label(), e))?;
    if !status.success() {
        return Err(Error::NonZero(label(), status));
    }
    Ok(())
}

pub(crate) fn run_output(program: &str, args: &[&str]) -> Result<Option<String>, Error> {
    let label = || format!("{program} {}", args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::Spawn(label(), e))?;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
}

/// Runs `program args...` with `dir` as the working directory, grounded
/// on `boulder::build::upstream`'s pattern of `current_dir`-scoped
/// subprocess calls.
pub(crate) fn run_in_dir(dir: &Path, program: &str, args: &[&str]) -> Result<(), Error> {
    let label = || format!("{program} {}", args.join(" "));
    let status = Command::new(program)
        .args(args)
        .current_dir(dir)
        .status()
        .map_err(|e| Error::Spawn(label(), e))?;
    if !status.success() {
        return Err(Error::NonZero(label(), status));
    }
    Ok(())
}

/// Runs a VCS `update`, then the application's `stage-build` script from
/// the checkout root, then makes the tree world-readable. `stage-build`
/// is run unconditionally, not only when present: a VCS-deployed
/// application without one is a subprocess-spawn failure, which
/// propagates and triggers ALL-STOP like any other subprocess failure.
pub fn update_and_build(backend: &Vcs, path: &Path, version: &str) -> Result<(), Error> {
    backend.update(path, version)?;

    let stage_build = path.join("stage-build");
    hostfs::run_in_dir(&stage_build, path)?;

    hostfs::chmod_recursive_world_readable(path).map_err(|e| Error::Io(path.to_path_buf(), io_source(e)))?;

    Ok(())
}

fn io_source(e: hostfs::Error) -> std::io::Error {
    match e {
        hostfs::Error::Io(_, source) => source,
        other => std::io::Error::other(other.to_string()),
    }
}
