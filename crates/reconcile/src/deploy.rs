// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `deploy()`: the reconciliation cycle of `spec.md` §4.5.2, run once
//! per `/hosts.version` transition (or once, under `--run-once`).

use std::collections::{BTreeMap, BTreeSet, HashSet};

use agentlock::{with_node_lock, RoleLock};
use log::{info, warn};
use pkgbackend::{PackageManager, VcsRegistry};
use zk::{Coordinator, Value};

use crate::{ops, Deployment, Error, Reconciler, Version};

/// Runs one reconciliation cycle. Returns `Ok(())` both when the cycle
/// completes successfully and when it is silently abandoned (the
/// cluster going ALL-STOP mid-flight is not a failure of this call);
/// any other `Err` means the cycle failed and the fleet has been set to
/// ALL-STOP.
pub async fn deploy(
    reconciler: &mut Reconciler,
    coord: &dyn Coordinator,
    pm: &dyn PackageManager,
    vcs: &VcsRegistry,
    root: &hostfs::Root,
    after_hook: Option<&[String]>,
) -> Result<(), Error> {
    let cluster_version = get_cluster_version(coord).await?;

    if cluster_version.is_all_stop() {
        info!("ALL STOP");
        return Ok(());
    }

    let host_path = format!("/hosts/{}", reconciler.host_id);
    clear_host_error(coord, &host_path).await?;

    let host_version = coord
        .get_properties(&host_path)
        .await?
        .get("version")
        .cloned()
        .unwrap_or(Value::Null);

    if cluster_version == host_version {
        crate::status::write_status(&reconciler.run_dir, &cluster_version, "done")?;
        return Ok(());
    }

    match run_cycle(reconciler, coord, pm, vcs, root, &cluster_version).await {
        Ok(()) => {
            reconciler.failing = false;
            if let Some(hook) = after_hook {
                run_after_hook(hook);
            }
            Ok(())
        }
        Err(Error::Abandoned) => {
            warn!("Abandoning deployment because cluster version is None");
            Ok(())
        }
        Err(e) => {
            reconciler.failing = true;
            set_all_stop(coord).await.ok();
            set_host_error(coord, &host_path, &e).await.ok();
            crate::status::write_status(&reconciler.run_dir, &cluster_version, "error").ok();
            Err(e)
        }
    }
}

async fn run_cycle(
    reconciler: &mut Reconciler,
    coord: &dyn Coordinator,
    pm: &dyn PackageManager,
    vcs: &VcsRegistry,
    root: &hostfs::Root,
    cluster_version: &Value,
) -> Result<(), Error> {
    info!("{}", "=".repeat(60));
    info!("deploying version {cluster_version}");
    crate::status::write_status(&reconciler.run_dir, cluster_version, "deploying")?;

    let mut cleaned = false;

    reconciler.role_controller = match &reconciler.role {
        Some(role) => ops::update_role_controller(coord, root, pm, vcs, role, &mut cleaned).await?,
        None => None,
    };

    let deployments =
        tokio::time::timeout(
            std::time::Duration::from_secs(99),
            crate::enumerate_deployments(coord, &reconciler.host_id, &reconciler.host_fqdn, reconciler.role.as_deref()),
        )
        .await
        .map_err(|_| Error::Configuration("timed out enumerating deployments".to_string()))??;

    crate::status::write_status(&reconciler.run_dir, cluster_version, "got deployments")?;

    let deploy_versions = validate_versions(&deployments)?;
    let desired_apps: HashSet<&str> = deployments.iter().map(|d| d.app.as_str()).collect();
    let desired_set: HashSet<(&str, &str, u32)> =
        deployments.iter().map(|d| (d.app.as_str(), d.path.as_str(), d.n)).collect();
    let desired_rpms: HashSet<&str> = deploy_versions.keys().map(String::as_str).collect();

    crate::status::write_status(&reconciler.run_dir, cluster_version, "remove old deployments")?;

    let installed_deployments = hostfs::get_installed_deployments(root)?;
    let mut installed_apps: HashSet<String> = HashSet::new();
    for installed in &installed_deployments {
        installed_apps.insert(installed.app.clone());
        check_abandon(coord, &reconciler.role_controller).await?;
        if !desired_set.contains(&(installed.app.as_str(), installed.path.as_str(), installed.n)) {
            hostfs::remove_deployment(root, installed)?;
        }
    }

    crate::status::write_status(&reconciler.run_dir, cluster_version, "update software")?;

    if reconciler.role_controller.is_some() {
        let role = reconciler
            .role
            .clone()
            .expect("role_controller can only be Some when a role is configured");
        let lock = RoleLock::acquire(coord, &role, &reconciler.host_id, &reconciler.host_fqdn).await?;
        let result = run_locked_updates(reconciler, coord, root, &deploy_versions, &deployments, pm, vcs, &mut cleaned, false).await;
        match result {
            Ok(()) => lock.release_success(coord).await?,
            Err(e) => return Err(e), // retained on failure, per spec.md §4.4
        }
    } else {
        run_locked_updates(reconciler, coord, root, &deploy_versions, &deployments, pm, vcs, &mut cleaned, true).await?;
    }

    let installed_rpms = hostfs::get_installed_applications(root)?;
    for rpm_name in installed_rpms_minus(&installed_rpms, &desired_rpms) {
        ops::uninstall_something(root, pm, &rpm_name)?;
    }

    let desired_app_names: HashSet<String> = desired_apps.iter().map(|s| s.to_string()).collect();
    for app in installed_apps.difference(&desired_app_names) {
        hostfs::remove_app_dir(root, app);
    }

    let host_path = format!("/hosts/{}", reconciler.host_id);
    let mut props = coord.get_properties(&host_path).await?;
    props.insert("version".to_string(), cluster_version.clone());
    coord.set_properties(&host_path, props).await?;

    crate::status::write_host_version(&reconciler.run_dir, cluster_version)?;
    crate::status::write_status(&reconciler.run_dir, cluster_version, "done")?;

    info!("done deploying version {cluster_version}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_locked_updates(
    reconciler: &Reconciler,
    coord: &dyn Coordinator,
    root: &hostfs::Root,
    deploy_versions: &BTreeMap<String, Version>,
    deployments: &[Deployment],
    pm: &dyn PackageManager,
    vcs: &VcsRegistry,
    cleaned: &mut bool,
    node_lock_active: bool,
) -> Result<(), Error> {
    run_role_script(root, reconciler, "starting-deployments").await?;

    for (rpm_name, version) in deploy_versions {
        check_abandon(coord, &reconciler.role_controller).await?;
        ops::install_something(root, pm, vcs, rpm_name, version, cleaned)?;
    }

    let mut ordered: Vec<&Deployment> = deployments.iter().collect();
    ordered.sort_by(|a, b| (&a.path, a.n).cmp(&(&b.path, b.n)));

    for d in ordered {
        check_abandon(coord, &reconciler.role_controller).await?;
        let hostfs_d: hostfs::Deployment = d.into();

        if node_lock_active {
            let flat_path = zk::path::flatten(&d.path);
            with_node_lock(coord, &flat_path, || async {
                check_abandon(coord, &reconciler.role_controller).await?;
                install_one(coord, root, &hostfs_d).await
            })
            .await?;
        } else {
            install_one(coord, root, &hostfs_d).await?;
        }
    }

    run_role_script(root, reconciler, "ending-deployments").await?;
    Ok(())
}

async fn install_one(coord: &dyn Coordinator, root: &hostfs::Root, d: &hostfs::Deployment) -> Result<(), Error> {
    match hostfs::install_deployment(root, d) {
        Ok(()) => Ok(()),
        Err(e) => {
            set_all_stop(coord).await?;
            Err(e.into())
        }
    }
}

/// Invokes the role controller's `starting-deployments` /
/// `ending-deployments` script with `/roles/<role>` as its sole
/// argument. A no-op when no role controller is installed: there is
/// nothing to invoke.
async fn run_role_script(root: &hostfs::Root, reconciler: &Reconciler, script_name: &str) -> Result<(), Error> {
    let (Some(role), Some(controller_rpm)) = (&reconciler.role, &reconciler.role_controller) else {
        return Ok(());
    };
    let script = root.opt(controller_rpm).join("bin").join(script_name);
    if !script.exists() {
        return Ok(());
    }
    let role_path = format!("/roles/{role}");
    hostfs::run_installer(&script, &[role_path]).map_err(hostfs::Error::from)?;
    Ok(())
}

/// `check_abandon()` of `spec.md` §4.5.6: re-reads the *live* cluster
/// version (not the snapshot taken at deploy-entry) so a concurrent
/// ALL-STOP write is observed promptly.
async fn check_abandon(coord: &dyn Coordinator, role_controller: &Option<String>) -> Result<(), Error> {
    if role_controller.is_some() {
        return Ok(());
    }
    if get_cluster_version(coord).await?.is_all_stop() {
        return Err(Error::Abandoned);
    }
    Ok(())
}

async fn get_cluster_version(coord: &dyn Coordinator) -> Result<Value, Error> {
    Ok(coord.get_properties("/hosts").await?.get("version").cloned().unwrap_or(Value::Null))
}

async fn set_all_stop(coord: &dyn Coordinator) -> Result<(), Error> {
    let mut props = coord.get_properties("/hosts").await?;
    props.insert("version".to_string(), Value::Null);
    coord.set_properties("/hosts", props).await?;
    Ok(())
}

async fn clear_host_error(coord: &dyn Coordinator, host_path: &str) -> Result<(), Error> {
    let mut props = coord.get_properties(host_path).await?;
    if props.remove("error").is_some() {
        coord.set_properties(host_path, props).await?;
    }
    Ok(())
}

async fn set_host_error(coord: &dyn Coordinator, host_path: &str, error: &Error) -> Result<(), Error> {
    let mut props = coord.get_properties(host_path).await?;
    props.insert("error".to_string(), Value::from(error.to_string()));
    coord.set_properties(host_path, props).await?;
    Ok(())
}

/// Every rpm-name under `/opt` not desired this cycle, per `spec.md`
/// §4.3/§4.5.2: this is an independent `/opt` scan
/// (`hostfs::get_installed_applications`), not derived from the
/// marker-scan `hostfs::get_installed_deployments` used above for
/// per-path removal, since an rpm whose `.deployed` marker was lost or
/// never written is still installed and still needs to be seen here.
fn installed_rpms_minus(installed: &BTreeSet<String>, desired_rpms: &HashSet<&str>) -> Vec<String> {
    installed.iter().filter(|rpm| !desired_rpms.contains(rpm.as_str())).cloned().collect()
}

fn run_after_hook(hook: &[String]) {
    let Some((program, args)) = hook.split_first() else {
        return;
    };
    match std::process::Command::new(program).args(args).status() {
        Ok(status) if !status.success() => warn!("after-hook {hook:?} exited with {status}"),
        Ok(_) => {}
        Err(e) => warn!("running after-hook {hook:?}: {e}"),
    }
}

/// Checks that every deployment sharing an `rpm_name` agrees on
/// `version`, per `spec.md` §4.5.5. Returns the per-rpm version map in
/// deterministic (sorted) order.
fn validate_versions(deployments: &[Deployment]) -> Result<BTreeMap<String, Version>, Error> {
    let mut versions: BTreeMap<String, Version> = BTreeMap::new();
    for d in deployments {
        match versions.get(&d.rpm_name) {
            Some(existing) if *existing != d.version => {
                return Err(Error::Conflict(format!(
                    "inconsistent versions for {}: {:?} != {:?}",
                    d.rpm_name, d.version, existing
                )));
            }
            Some(_) => {}
            None => {
                versions.insert(d.rpm_name.clone(), d.version.clone());
            }
        }
    }
    Ok(versions)
}
