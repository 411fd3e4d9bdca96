// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `install_something` / `uninstall_something`: the package-manager-or-
//! VCS install/remove logic shared between regular deployments and the
//! role-controller overlay.

use fs_err as fs;
use log::info;
use pkgbackend::{PackageManager, VcsRegistry};
use zk::{Coordinator, Value};

use crate::{Error, Version};

/// Implements `spec.md` §4.5.3: compares the desired `(type, version)`
/// at `/roles/<role>` to the single installed role controller (if any),
/// and drives whatever install/uninstall transition is needed. Returns
/// the installed controller's rpm name, or `None` if no controller is
/// installed afterward.
pub async fn update_role_controller(
    coord: &dyn Coordinator,
    root: &hostfs::Root,
    pm: &dyn PackageManager,
    vcs: &VcsRegistry,
    role: &str,
    cleaned: &mut bool,
) -> Result<Option<String>, Error> {
    let installed = hostfs::get_installed_role_controller(root)?;

    let role_path = format!("/roles/{role}");
    if !coord.exists(&role_path).await? {
        if let Some(installed_name) = installed {
            uninstall_something(root, pm, &installed_name)?;
        }
        return Ok(None);
    }

    let props = coord.get_properties(&role_path).await?;
    let desired_pkg = props
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Configuration(format!("{role_path}: missing type property")))?
        .to_string();
    let desired_version_raw = props
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Configuration(format!("{role_path}: missing version property")))?;
    let desired_version = Version::parse(desired_version_raw);

    if let Some(installed_name) = &installed {
        let installed_base = hostfs::versioned_app_base(installed_name);
        if installed_base != desired_pkg {
            info!("role {role}: swapping controller {installed_name} for {desired_pkg}");
            uninstall_something(root, pm, installed_name)?;
        }
    }

    install_something(root, pm, vcs, &desired_pkg, &desired_version, cleaned)?;

    Ok(Some(desired_pkg))
}

fn is_vcs_checkout(opt_dir: &std::path::Path) -> bool {
    opt_dir.join(".git").is_dir() || opt_dir.join(".svn").is_dir()
}

fn remove_dir_if_exists(path: &std::path::Path) -> Result<(), Error> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(path.to_path_buf(), e)),
    }
}

/// Implements `spec.md` §4.5.7.
pub fn install_something(
    root: &hostfs::Root,
    pm: &dyn PackageManager,
    vcs: &VcsRegistry,
    rpm_name: &str,
    version: &Version,
    cleaned: &mut bool,
) -> Result<(), Error> {
    let opt_dir = root.opt(rpm_name);
    let installed_version = pm.rpm_version(rpm_name)?;

    match version {
        Version::Explicit(wanted) => {
            if installed_version.as_deref() == Some(wanted.as_str()) {
                return Ok(());
            }
            if is_vcs_checkout(&opt_dir) {
                info!("removing checkout at {opt_dir:?} to install {rpm_name}-{wanted}");
                remove_dir_if_exists(&opt_dir)?;
            }
            pm.install(rpm_name, Some(wanted), cleaned)?;
            Ok(())
        }

        Version::Vcs(scheme, rest) => {
            let raw = format!("{scheme}:{rest}");
            let backend = vcs.for_version(&raw).ok_or_else(|| Error::UnknownVcsScheme(scheme.clone()))?;

            if installed_version.is_some() {
                info!("removing package-manager install of {rpm_name} to switch to {raw}");
                pm.remove(rpm_name)?;
                remove_dir_if_exists(&opt_dir)?;
            } else if backend.is_under(&opt_dir) {
                let current = backend.current_version(&opt_dir)?;
                if current.as_deref() != Some(raw.as_str()) {
                    info!("removing conflicting checkout {current:?} != {raw:?}");
                    remove_dir_if_exists(&opt_dir)?;
                }
            }

            pkgbackend::update_and_build(backend, &opt_dir, &raw)?;
            Ok(())
        }

        Version::AnyInstalled => {
            if installed_version.is_some() || opt_dir.exists() {
                return Ok(());
            }
            pm.install(rpm_name, None, cleaned)?;
            Ok(())
        }
    }
}

/// Removes a no-longer-desired rpm: its `/opt` tree, and (for
/// package-manager installs) the package itself.
pub fn uninstall_something(root: &hostfs::Root, pm: &dyn PackageManager, rpm_name: &str) -> Result<(), Error> {
    let opt_dir = root.opt(rpm_name);
    if is_vcs_checkout(&opt_dir) {
        info!("removing checkout {opt_dir:?}");
        remove_dir_if_exists(&opt_dir)?;
    } else {
        pm.remove(rpm_name)?;
        remove_dir_if_exists(&opt_dir)?;
    }
    Ok(())
}
