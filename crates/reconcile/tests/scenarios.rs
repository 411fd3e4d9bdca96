// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end reconciliation cycles against an in-memory coordination
//! tree, a tempdir-rooted `hostfs::Root`, and a [`FakePm`] that lays
//! down its own fake `zookeeper-deploy` script on install (mirroring
//! what a real package install does), since `hostfs::install_deployment`
//! shells out to whatever script `opt/<rpm>/bin/zookeeper-deploy` names
//! and does not write the `.deployed` marker itself. One scenario
//! drives a real local git checkout, since `pkgbackend::vcs::Git`
//! shells to a real `git` binary rather than taking a pluggable
//! backend.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use pkgbackend::{PackageManager, VcsRegistry};
use reconcile::Reconciler;
use zk::{Coordinator, CreateOptions, Memory, Value};

/// Creates every path component of `path` that doesn't yet exist.
async fn ensure_path(coord: &dyn Coordinator, path: &str) {
    let mut built = String::new();
    for segment in path.trim_start_matches('/').split('/') {
        built.push('/');
        built.push_str(segment);
        if !coord.exists(&built).await.unwrap() {
            coord.create(&built, "", CreateOptions::default()).await.unwrap();
        }
    }
}

async fn set_props(coord: &dyn Coordinator, path: &str, props: &[(&str, Value)]) {
    let mut existing = coord.get_properties(path).await.unwrap();
    for (k, v) in props {
        existing.insert((*k).to_string(), v.clone());
    }
    coord.set_properties(path, existing).await.unwrap();
}

/// Seeds `/cust/<cust_name>/deploy/<host_id>`: a single-token `type`
/// (optionally with `version`) targeting `host_id`.
async fn seed_single_app_deploy(coord: &dyn Coordinator, cust_name: &str, app_type: &str, app_version: Option<&str>, host_id: &str) {
    let app_path = format!("/cust/{cust_name}");
    ensure_path(coord, &format!("{app_path}/deploy")).await;
    let mut props = vec![("type", Value::from(app_type))];
    if let Some(v) = app_version {
        props.push(("version", Value::from(v)));
    }
    set_props(coord, &app_path, &props).await;
    coord.create(&format!("{app_path}/deploy/{host_id}"), "", CreateOptions::default()).await.unwrap();
}

async fn new_coord(cluster_version: Value) -> Memory {
    let coord = Memory::new();
    coord.create("/hosts", "", CreateOptions::default()).await.unwrap();
    set_props(&coord, "/hosts", &[("version", cluster_version)]).await;
    coord
}

fn fake_root() -> (tempfile::TempDir, hostfs::Root) {
    let tmp = tempfile::tempdir().unwrap();
    let root = hostfs::Root::new(tmp.path());
    (tmp, root)
}

fn write_executable(path: &Path, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

/// A `zookeeper-deploy` that derives its own root from its own path
/// (bin, rpm, opt: three levels up), so it stays correct regardless of
/// which process or working directory invokes it.
fn fake_installer_script(app: &str) -> String {
    format!(
        "#!/bin/sh\n\
         set -e\n\
         bindir=$(cd \"$(dirname \"$0\")\" && pwd)\n\
         root=$(cd \"$bindir/../../..\" && pwd)\n\
         etc=\"$root/etc/{app}\"\n\
         if [ \"$1\" = \"-u\" ]; then\n\
         \tshift\n\
         \tpath=\"$1\"; n=\"$2\"\n\
         \tflat=$(printf '%s' \"$path\" | sed 's#^/##; s#/#,#g')\n\
         \trm -f \"$etc/$flat.$n.deployed\"\n\
         \texit 0\n\
         fi\n\
         if [ \"$1\" = \"-r\" ]; then shift 2; fi\n\
         path=\"$1\"; n=\"$2\"\n\
         flat=$(printf '%s' \"$path\" | sed 's#^/##; s#/#,#g')\n\
         mkdir -p \"$etc\"\n\
         : > \"$etc/$flat.$n.deployed\"\n"
    )
}

fn write_fake_installer(root: &hostfs::Root, rpm_name: &str, app: &str) {
    let script_path = root.opt(rpm_name).join("bin").join("zookeeper-deploy");
    write_executable(&script_path, &fake_installer_script(app));
}

/// Installs a fake role-controller script (`starting-deployments` or
/// `ending-deployments`) that appends its sole argument to a log file
/// under `root`, so a test can assert it ran.
fn write_fake_role_script(root: &hostfs::Root, rpm_name: &str, script_name: &str, log_name: &str) {
    let script_path = root.opt(rpm_name).join("bin").join(script_name);
    let script = format!(
        "#!/bin/sh\n\
         set -e\n\
         bindir=$(cd \"$(dirname \"$0\")\" && pwd)\n\
         root=$(cd \"$bindir/../../..\" && pwd)\n\
         echo \"$1\" >> \"$root/{log_name}\"\n"
    );
    write_executable(&script_path, &script);
}

fn deployed_marker(root: &hostfs::Root, app: &str, path: &str, n: u32) -> PathBuf {
    let flat = zk::path::flatten(path);
    root.etc(app).join(format!("{flat}.{n}.deployed"))
}

/// A [`PackageManager`] double. On install, it lays down a fake
/// `zookeeper-deploy` for the rpm under `root` (as a real package
/// install would), so a later per-path deploy step has something to
/// run. `Mutex`, not `RefCell`: the trait requires `Send + Sync`.
struct FakePm {
    root: PathBuf,
    installed: Mutex<BTreeMap<String, String>>,
    install_calls: Mutex<u32>,
    remove_calls: Mutex<u32>,
}

impl FakePm {
    fn new(root: &hostfs::Root) -> Self {
        Self {
            root: root.path().to_path_buf(),
            installed: Mutex::new(BTreeMap::new()),
            install_calls: Mutex::new(0),
            remove_calls: Mutex::new(0),
        }
    }

    fn preinstall(&self, rpm_name: &str, version: &str) {
        self.installed.lock().unwrap().insert(rpm_name.to_string(), version.to_string());
        write_fake_installer(&hostfs::Root::new(&self.root), rpm_name, &hostfs::versioned_app_base(rpm_name));
    }

    fn install_calls(&self) -> u32 {
        *self.install_calls.lock().unwrap()
    }

    fn remove_calls(&self) -> u32 {
        *self.remove_calls.lock().unwrap()
    }
}

impl PackageManager for FakePm {
    fn rpm_version(&self, rpm_name: &str) -> Result<Option<String>, pkgbackend::Error> {
        Ok(self.installed.lock().unwrap().get(rpm_name).cloned())
    }

    fn install(&self, rpm_name: &str, version: Option<&str>, cleaned: &mut bool) -> Result<(), pkgbackend::Error> {
        *cleaned = true;
        *self.install_calls.lock().unwrap() += 1;
        self.installed.lock().unwrap().insert(rpm_name.to_string(), version.unwrap_or("latest").to_string());
        write_fake_installer(&hostfs::Root::new(&self.root), rpm_name, &hostfs::versioned_app_base(rpm_name));
        Ok(())
    }

    fn remove(&self, rpm_name: &str) -> Result<(), pkgbackend::Error> {
        *self.remove_calls.lock().unwrap() += 1;
        self.installed.lock().unwrap().remove(rpm_name);
        Ok(())
    }
}

async fn start_reconciler(coord: &dyn Coordinator, host_id: &str, role: Option<&str>, run_dir: &Path) -> Reconciler {
    Reconciler::start(coord, host_id.to_string(), role.map(str::to_string), run_dir.to_path_buf())
        .await
        .unwrap()
}

/// S1: a freshly started host with one targeted deployment installs it
/// and advances its recorded version to match the cluster's.
#[tokio::test]
async fn s1_initial_deploy_installs_and_records_version() {
    let coord = new_coord(Value::Int(1)).await;
    seed_single_app_deploy(&coord, "app", "z4m", Some("1.0.0"), "h1").await;

    let (_tmp, root) = fake_root();
    let run_dir = tempfile::tempdir().unwrap();
    let mut reconciler = start_reconciler(&coord, "h1", None, run_dir.path()).await;

    let pm = FakePm::new(&root);
    let vcs = VcsRegistry::new();
    reconcile::deploy(&mut reconciler, &coord, &pm, &vcs, &root, None).await.unwrap();

    assert!(deployed_marker(&root, "z4m", "/cust/app", 0).exists());
    assert_eq!(pm.rpm_version("z4m").unwrap().as_deref(), Some("1.0.0"));

    let host_props = coord.get_properties("/hosts/h1").await.unwrap();
    assert_eq!(host_props.get("version"), Some(&Value::Int(1)));

    let (_, _, version, phrase) = reconcile::status::read_status(run_dir.path()).unwrap().unwrap();
    assert_eq!(version, "1");
    assert_eq!(phrase, "done");
}

/// S2: a cluster-version downgrade is just another version transition
/// from the reconciler's point of view. It delegates the install
/// unconditionally to the package manager and trusts a single call's
/// result; any "yum lies about what it installed" workaround lives
/// entirely inside `pkgbackend::yum::Yum` and is out of scope here.
#[tokio::test]
async fn s2_version_change_delegates_to_package_manager_once() {
    let coord = new_coord(Value::Int(1)).await;
    seed_single_app_deploy(&coord, "app", "z4m", Some("0.9.0"), "h1").await;

    let (_tmp, root) = fake_root();
    let run_dir = tempfile::tempdir().unwrap();
    let mut reconciler = start_reconciler(&coord, "h1", None, run_dir.path()).await;

    let pm = FakePm::new(&root);
    pm.preinstall("z4m", "1.0.0");
    let vcs = VcsRegistry::new();
    reconcile::deploy(&mut reconciler, &coord, &pm, &vcs, &root, None).await.unwrap();

    assert_eq!(pm.install_calls(), 1);
    assert_eq!(pm.rpm_version("z4m").unwrap().as_deref(), Some("0.9.0"));
}

/// S3: switching a deployment's rpm-name (here a versioned, no-property
/// "any installed" app) uninstalls the superseded rpm and deploys via
/// the new one's own `zookeeper-deploy`. Directly inspecting
/// `get_installed_deployments` between the two cycles shows the
/// property this scenario is named for: with both rpms' scripts on
/// disk but only one `.script` marker recorded, the other is silently
/// skipped rather than harvested.
#[tokio::test]
async fn s3_versioned_rpm_switch_uninstalls_old_and_skips_stale_marker() {
    let coord = new_coord(Value::Int(1)).await;
    seed_single_app_deploy(&coord, "app", "z4m", Some("1.0.0"), "h1").await;

    let (_tmp, root) = fake_root();
    let run_dir = tempfile::tempdir().unwrap();
    let mut reconciler = start_reconciler(&coord, "h1", None, run_dir.path()).await;
    let pm = FakePm::new(&root);
    let vcs = VcsRegistry::new();
    reconcile::deploy(&mut reconciler, &coord, &pm, &vcs, &root, None).await.unwrap();

    assert!(root.opt("z4m").join("bin").join("zookeeper-deploy").exists());

    // A second rpm claiming the same flattened marker path, installed
    // out of band (as package-manager install would do), but with no
    // `.script` marker of its own yet: the existing one still points
    // at `z4m`, so this rpm's copy is invisible to a scan right now.
    write_fake_installer(&root, "z4m-4.0.0", "z4m");
    let seen = hostfs::get_installed_deployments(&root).unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].rpm_name, "z4m", "stale `.script` marker still attributes the deployment to the old rpm");

    // Cluster now names the versioned rpm for the same app (DONT_CARE):
    // drop the `version` property so the hyphenated-name branch applies.
    let mut props = coord.get_properties("/cust/app").await.unwrap();
    props.remove("version");
    props.insert("type".to_string(), Value::from("z4m-4.0.0"));
    coord.set_properties("/cust/app", props).await.unwrap();
    set_props(&coord, "/hosts", &[("version", Value::Int(2))]).await;

    reconcile::deploy(&mut reconciler, &coord, &pm, &vcs, &root, None).await.unwrap();

    assert!(!root.opt("z4m").exists(), "superseded rpm's opt tree is removed");
    assert!(root.opt("z4m-4.0.0").join("bin").join("zookeeper-deploy").exists());
    assert!(deployed_marker(&root, "z4m", "/cust/app", 0).exists());
    assert_eq!(pm.remove_calls(), 1);
}

/// S4: a deployment switching from a package-manager version to a `git:`
/// checkout clones a real local repository and checks out the named
/// branch. Exercises the real `pkgbackend::vcs::Git` backend, not a
/// fake, since `VcsRegistry` is a closed enum.
#[tokio::test]
async fn s4_vcs_switch_clones_and_checks_out_branch() {
    let upstream = tempfile::tempdir().unwrap();
    run_git(upstream.path(), &["init", "-q", "-b", "main"]);
    run_git(upstream.path(), &["config", "user.email", "test@example.com"]);
    run_git(upstream.path(), &["config", "user.name", "Test"]);
    std::fs::write(upstream.path().join("README"), "hello\n").unwrap();
    run_git(upstream.path(), &["add", "README"]);
    run_git(upstream.path(), &["commit", "-q", "-m", "initial"]);
    run_git(upstream.path(), &["checkout", "-q", "-b", "release"]);
    std::fs::write(upstream.path().join("README"), "release\n").unwrap();
    write_executable(&upstream.path().join("stage-build"), "#!/bin/sh\nexit 0\n");
    run_git(upstream.path(), &["add", "stage-build"]);
    run_git(upstream.path(), &["commit", "-q", "-am", "release content"]);

    let vcs_version = format!("git://{}#release", upstream.path().display());

    let coord = new_coord(Value::Int(1)).await;
    seed_single_app_deploy(&coord, "app", "zcheckout", Some(&vcs_version), "h1").await;

    let (_tmp, root) = fake_root();
    write_fake_installer(&root, "zcheckout", "zcheckout");

    let run_dir = tempfile::tempdir().unwrap();
    let mut reconciler = start_reconciler(&coord, "h1", None, run_dir.path()).await;
    let pm = FakePm::new(&root);
    let vcs = VcsRegistry::new();
    reconcile::deploy(&mut reconciler, &coord, &pm, &vcs, &root, None).await.unwrap();

    let checkout = root.opt("zcheckout");
    assert!(checkout.join(".git").is_dir());
    assert_eq!(std::fs::read_to_string(checkout.join("README")).unwrap(), "release\n");
    assert_eq!(pm.install_calls(), 0, "a VCS version never touches the package manager");
}

fn run_git(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git").args(args).current_dir(dir).status().unwrap();
    assert!(status.success(), "git {args:?} failed in {dir:?}");
}

/// S5: the cluster going ALL-STOP (observed either at cycle entry or, on
/// a live re-read, by `check_abandon` between per-deployment steps — the
/// two are observably identical from the outside) is swallowed as
/// `Ok(())`, leaves the host's recorded version untouched, and does not
/// mark the host as failing.
#[tokio::test]
async fn s5_all_stop_is_silently_abandoned_without_marking_failure() {
    let coord = new_coord(Value::Int(1)).await;
    seed_single_app_deploy(&coord, "app", "z4m", Some("1.0.0"), "h1").await;

    let (_tmp, root) = fake_root();
    let run_dir = tempfile::tempdir().unwrap();
    let mut reconciler = start_reconciler(&coord, "h1", None, run_dir.path()).await;

    // A prior writer has already set ALL-STOP by the time this cycle
    // starts: `deploy()` takes this path at cycle entry, `check_abandon`
    // would take the identical path a few `.await`s later.
    set_props(&coord, "/hosts", &[("version", Value::Null)]).await;

    let pm = FakePm::new(&root);
    let vcs = VcsRegistry::new();
    let result = reconcile::deploy(&mut reconciler, &coord, &pm, &vcs, &root, None).await;

    assert!(result.is_ok());
    assert!(!reconciler.failing);
    assert!(!deployed_marker(&root, "z4m", "/cust/app", 0).exists());

    let host_props = coord.get_properties("/hosts/h1").await.unwrap();
    assert_eq!(host_props.get("version"), Some(&Value::Null));
}

/// S6: a host configured with a role installs the named role
/// controller, runs its `starting-deployments`/`ending-deployments`
/// hooks around the role-targeted deployment, and releases its
/// `/role-locks/<role>` entry on success.
#[tokio::test]
async fn s6_role_controller_runs_hooks_and_releases_lock() {
    let coord = new_coord(Value::Int(1)).await;

    ensure_path(&coord, "/roles/my.role").await;
    set_props(&coord, "/roles/my.role", &[("type", Value::from("controller")), ("version", Value::from("1.0.0"))]).await;

    ensure_path(&coord, "/cust/app/deploy").await;
    set_props(&coord, "/cust/app", &[("type", Value::from("z4m")), ("version", Value::from("1.0.0"))]).await;
    coord.create("/cust/app/deploy/my.role", "", CreateOptions::default()).await.unwrap();

    ensure_path(&coord, "/role-locks/my.role").await;

    let (_tmp, root) = fake_root();
    write_fake_role_script(&root, "controller", "starting-deployments", "hooks.log");
    write_fake_role_script(&root, "controller", "ending-deployments", "hooks.log");

    let run_dir = tempfile::tempdir().unwrap();
    let mut reconciler = start_reconciler(&coord, "h1", Some("my.role"), run_dir.path()).await;

    let pm = FakePm::new(&root);
    let vcs = VcsRegistry::new();
    reconcile::deploy(&mut reconciler, &coord, &pm, &vcs, &root, None).await.unwrap();

    assert_eq!(reconciler.role_controller.as_deref(), Some("controller"));
    assert!(deployed_marker(&root, "z4m", "/cust/app", 0).exists());

    let hooks_log = std::fs::read_to_string(root.path().join("hooks.log")).unwrap();
    assert_eq!(hooks_log.lines().collect::<Vec<_>>(), vec!["/roles/my.role", "/roles/my.role"]);

    assert!(coord.get_children("/role-locks/my.role").await.unwrap().is_empty(), "lock released on success");
}
