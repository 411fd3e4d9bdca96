// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Reads and writes the local `opt/<rpm>/...` and `etc/<app>/...` tree that
//! records which deployments are currently materialised on this host.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use fs_err as fs;
use log::{debug, warn};
use regex::Regex;
use thiserror::Error;

mod installer;

pub use installer::{run_installer, InstallerError};

/// A deployment this host either has, or wants, installed: one
/// `(app, path, n_index)` triple materialised from a particular rpm.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deployment {
    pub app: String,
    pub subtype: Option<String>,
    pub rpm_name: String,
    pub path: String,
    pub n: u32,
}

/// Root directory all `opt`/`etc` paths are resolved under. Honors
/// `TEST_ROOT` so the whole filesystem surface can be sandboxed in tests,
/// the same convention `cargo-test-support`'s `paths::root()` provides for
/// cargo's own integration tests.
#[derive(Debug, Clone)]
pub struct Root(PathBuf);

impl Root {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn from_env() -> Self {
        match std::env::var_os("TEST_ROOT") {
            Some(path) => Self(PathBuf::from(path)),
            None => Self(PathBuf::from("/")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn opt(&self, rpm_name: &str) -> PathBuf {
        self.0.join("opt").join(rpm_name)
    }

    pub fn etc(&self, app: &str) -> PathBuf {
        self.0.join("etc").join(app)
    }

    fn installer_script(&self, rpm_name: &str) -> PathBuf {
        self.opt(rpm_name).join("bin").join("zookeeper-deploy")
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io at {0:?}")]
    Io(PathBuf, #[source] io::Error),
    #[error("more than one role controller installed: {0} and {1}")]
    MultipleRoleControllers(String, String),
    #[error(transparent)]
    Installer(#[from] InstallerError),
}

fn io_err(path: &Path, e: io::Error) -> Error {
    Error::Io(path.to_path_buf(), e)
}

/// Strips a trailing `-<version>` suffix from a versioned rpm directory
/// name (e.g. `z4m-4.0.0` -> `z4m`), mirroring the original's
/// `versioned_app` regex.
pub fn versioned_app_base(rpm_name: &str) -> String {
    let re = Regex::new(r"^(.+)-\d+(?:\.\d+)*$").expect("static regex");
    match re.captures(rpm_name) {
        Some(caps) => caps[1].to_string(),
        None => rpm_name.to_string(),
    }
}

/// `path[1:]` with `/` replaced by `,`, plus the `.<n>.<ext>` suffix used
/// for on-disk markers.
fn marker_name(path: &str, n: u32, ext: &str) -> String {
    format!("{}.{n}.{ext}", zk::path::flatten(path))
}

/// Walks `/opt/*/bin/zookeeper-deploy` to find installed apps, then
/// enumerates `/etc/<app>/*.deployed` files whose companion `.script`
/// marker matches the current installer. A mismatched `.script` means the
/// marker belongs to a prior, superseded rpm and is silently skipped.
pub fn get_installed_deployments(root: &Root) -> Result<Vec<Deployment>, Error> {
    let opt_dir = root.path().join("opt");
    let mut out = vec![];

    let entries = match fs::read_dir(&opt_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(io_err(&opt_dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| io_err(&opt_dir, e))?;
        let rpm_name = entry.file_name().to_string_lossy().into_owned();
        let script = root.installer_script(&rpm_name);
        if !script.exists() {
            continue;
        }

        let app = versioned_app_base(&rpm_name);
        let etc_dir = root.etc(&app);
        if !etc_dir.is_dir() {
            continue;
        }

        for marker in fs::read_dir(&etc_dir).map_err(|e| io_err(&etc_dir, e))? {
            let marker = marker.map_err(|e| io_err(&etc_dir, e))?;
            let name = marker.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(".deployed") else {
                continue;
            };
            let Some((flat_path, n)) = stem.rsplit_once('.') else {
                warn!("malformed deployed marker {name:?} in {etc_dir:?}, skipping");
                continue;
            };
            let Ok(n) = n.parse::<u32>() else {
                warn!("malformed deployed marker {name:?} in {etc_dir:?}, skipping");
                continue;
            };

            let script_marker = etc_dir.join(format!("{flat_path}.{n}.script"));
            if script_marker.is_file() {
                let recorded = fs::read_to_string(&script_marker).map_err(|e| io_err(&script_marker, e))?;
                if recorded.trim() != script.to_string_lossy() {
                    debug!(
                        "skipping {name:?}: installed by {recorded:?}, current installer is {script:?}"
                    );
                    continue;
                }
            }

            out.push(Deployment {
                app: app.clone(),
                subtype: None,
                rpm_name: rpm_name.clone(),
                path: zk::path::unflatten(flat_path),
                n,
            });
        }
    }

    out.sort();
    Ok(out)
}

/// Set of rpm-names whose `/opt/.../bin/zookeeper-deploy` exists.
pub fn get_installed_applications(root: &Root) -> Result<BTreeSet<String>, Error> {
    let opt_dir = root.path().join("opt");
    let mut out = BTreeSet::new();

    let entries = match fs::read_dir(&opt_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(io_err(&opt_dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| io_err(&opt_dir, e))?;
        let rpm_name = entry.file_name().to_string_lossy().into_owned();
        if root.installer_script(&rpm_name).exists() {
            out.insert(rpm_name);
        }
    }

    Ok(out)
}

/// The unique rpm-name whose `/opt/.../bin/starting-deployments` exists.
/// More than one installed role controller is a fatal configuration error.
pub fn get_installed_role_controller(root: &Root) -> Result<Option<String>, Error> {
    let opt_dir = root.path().join("opt");
    let mut found: Option<String> = None;

    let entries = match fs::read_dir(&opt_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(&opt_dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| io_err(&opt_dir, e))?;
        let rpm_name = entry.file_name().to_string_lossy().into_owned();
        if root.opt(&rpm_name).join("bin").join("starting-deployments").exists() {
            if let Some(existing) = &found {
                return Err(Error::MultipleRoleControllers(existing.clone(), rpm_name));
            }
            found = Some(rpm_name);
        }
    }

    Ok(found)
}

/// Runs `zookeeper-deploy [-r <subtype>] <path> <n>` and records the
/// `.script` marker. Does *not* write the `.deployed` marker: that is the
/// installer's own contract to fulfil.
pub fn install_deployment(root: &Root, d: &Deployment) -> Result<(), Error> {
    let etc_dir = root.etc(&d.app);
    fs::create_dir_all(&etc_dir).map_err(|e| io_err(&etc_dir, e))?;

    let script = root.installer_script(&d.rpm_name);
    let mut args = vec![];
    if let Some(subtype) = &d.subtype {
        args.push("-r".to_string());
        args.push(subtype.clone());
    }
    args.push(d.path.clone());
    args.push(d.n.to_string());

    run_installer(&script, &args)?;

    let script_marker = etc_dir.join(marker_name(&d.path, d.n, "script"));
    fs::write(&script_marker, script.to_string_lossy().as_bytes()).map_err(|e| io_err(&script_marker, e))?;

    Ok(())
}

/// Runs `zookeeper-deploy -u <path> <n>` and deletes both markers.
pub fn remove_deployment(root: &Root, d: &Deployment) -> Result<(), Error> {
    let script = root.installer_script(&d.rpm_name);
    let args = vec!["-u".to_string(), d.path.clone(), d.n.to_string()];
    run_installer(&script, &args)?;

    let etc_dir = root.etc(&d.app);
    let deployed_marker = etc_dir.join(marker_name(&d.path, d.n, "deployed"));
    let script_marker = etc_dir.join(marker_name(&d.path, d.n, "script"));
    for marker in [deployed_marker, script_marker] {
        if marker.exists() {
            fs::remove_file(&marker).map_err(|e| io_err(&marker, e))?;
        }
    }

    Ok(())
}

/// Removes `/etc/<app>` if present. A non-empty directory is logged and
/// not treated as fatal (housekeeping error disposition).
pub fn remove_app_dir(root: &Root, app: &str) {
    let etc_dir = root.etc(app);
    if !etc_dir.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir(&etc_dir) {
        warn!("removing {etc_dir:?}: {e}");
    }
}

/// Recursively make a tree world-readable (`chmod -R a+rX`), used after a
/// VCS checkout update. Implemented with direct syscalls rather than
/// shelling to `chmod`, since a build root may not have it on `$PATH`.
pub fn chmod_recursive_world_readable(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|e| io_err(path, e))?;
    let mut perms = metadata.permissions();
    let mode = perms.mode();
    let is_dir = metadata.is_dir();
    let add = if is_dir || mode & 0o111 != 0 { 0o555 } else { 0o444 };
    perms.set_mode(mode | add);
    fs::set_permissions(path, perms).map_err(|e| io_err(path, e))?;

    if is_dir {
        for entry in fs::read_dir(path).map_err(|e| io_err(path, e))? {
            let entry = entry.map_err(|e| io_err(path, e))?;
            chmod_recursive_world_readable(&entry.path())?;
        }
    }

    Ok(())
}

/// Runs `script` with a fresh working directory of `dir` (used for
/// `stage-build`, which the spec requires be run from the checkout root).
pub fn run_in_dir(script: &Path, dir: &Path) -> Result<(), InstallerError> {
    let status = Command::new(script)
        .current_dir(dir)
        .status()
        .map_err(|e| InstallerError::Spawn(script.to_path_buf(), e))?;
    if !status.success() {
        return Err(InstallerError::NonZero(script.to_path_buf(), status));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn versioned_app_base_strips_semver_suffix() {
        assert_eq!(versioned_app_base("z4m-4.0.0"), "z4m");
        assert_eq!(versioned_app_base("z4m-4"), "z4m");
        assert_eq!(versioned_app_base("z4m"), "z4m");
    }

    #[test]
    fn marker_name_matches_flat_path_convention() {
        assert_eq!(marker_name("/cust/app", 0, "deployed"), "cust,app.0.deployed");
    }

    #[test]
    fn get_installed_applications_empty_when_opt_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Root::new(tmp.path());
        assert!(get_installed_applications(&root).unwrap().is_empty());
    }

    #[test]
    fn get_installed_deployments_skips_mismatched_script_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Root::new(tmp.path());

        let bin_dir = root.opt("z4m-4.0.0").join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        fs::write(bin_dir.join("zookeeper-deploy"), "#!/bin/sh\n").unwrap();

        let etc_dir = root.etc("z4m");
        fs::create_dir_all(&etc_dir).unwrap();
        fs::write(etc_dir.join("cust,app.0.deployed"), "").unwrap();
        // Stale marker points at the old, now-uninstalled rpm.
        fs::write(
            etc_dir.join("cust,app.0.script"),
            root.opt("z4m").join("bin").join("zookeeper-deploy").to_string_lossy().as_bytes(),
        )
        .unwrap();

        let found = get_installed_deployments(&root).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn get_installed_deployments_finds_matching_script_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Root::new(tmp.path());

        let bin_dir = root.opt("z4m").join("bin");
        fs::create_dir_all(&bin_dir).unwrap();
        let script = bin_dir.join("zookeeper-deploy");
        fs::write(&script, "#!/bin/sh\n").unwrap();

        let etc_dir = root.etc("z4m");
        fs::create_dir_all(&etc_dir).unwrap();
        fs::write(etc_dir.join("cust,app.0.deployed"), "").unwrap();
        fs::write(etc_dir.join("cust,app.0.script"), script.to_string_lossy().as_bytes()).unwrap();

        let found = get_installed_deployments(&root).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "/cust/app");
        assert_eq!(found[0].n, 0);
        assert_eq!(found[0].rpm_name, "z4m");
    }
}
