// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Drives one host's reconciliation against the coordination tree's
//! `cluster_version`: enumerating desired deployments, installing and
//! removing software, and running per-path or per-role installer
//! scripts under the appropriate lock. See [`deploy`] for the entry
//! point and [`Reconciler::start`] for the startup sequence.

use std::path::PathBuf;

use thiserror::Error;
use zk::Coordinator;

mod deploy;
mod enumerate;
mod ops;
pub mod status;
mod version;

pub use deploy::deploy;
pub use enumerate::enumerate_deployments;
pub use ops::{install_something, update_role_controller, uninstall_something};
pub use version::Version;

/// A single `(app, path, n_index)` deployment this host desires, as
/// resolved from the coordination tree (as opposed to
/// [`hostfs::Deployment`], which describes one already materialised on
/// disk and carries no [`Version`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub app: String,
    pub subtype: Option<String>,
    pub version: Version,
    pub rpm_name: String,
    pub path: String,
    pub n: u32,
}

impl From<&Deployment> for hostfs::Deployment {
    fn from(d: &Deployment) -> Self {
        hostfs::Deployment {
            app: d.app.clone(),
            subtype: d.subtype.clone(),
            rpm_name: d.rpm_name.clone(),
            path: d.path.clone(),
            n: d.n,
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Zk(#[from] zk::Error),
    #[error(transparent)]
    HostFs(#[from] hostfs::Error),
    #[error(transparent)]
    PkgBackend(#[from] pkgbackend::Error),
    #[error(transparent)]
    Lock(#[from] agentlock::Error),
    #[error(transparent)]
    Status(#[from] status::Error),
    #[error("io at {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Configuration(String),
    #[error("no VCS backend registered for scheme {0:?}")]
    UnknownVcsScheme(String),
    #[error("another agent is running")]
    AnotherAgentRunning,
    /// Not a real failure: the cluster went ALL-STOP while this deploy
    /// was in flight. Carries no message of its own; `deploy()`'s
    /// caller must special-case it (see `spec.md` §4.5.6).
    #[error("deploy abandoned, cluster is ALL-STOP")]
    Abandoned,
}

/// Startup and per-cycle state for one host's agent, per `spec.md`
/// §4.5.1. Holds everything `deploy()` needs across calls that isn't
/// itself part of the coordination tree: the resolved identity, the
/// run directory, and the currently installed role controller (if
/// any), which `deploy()` refreshes every cycle.
pub struct Reconciler {
    pub host_id: String,
    pub host_fqdn: String,
    pub role: Option<String>,
    pub run_dir: PathBuf,
    pub role_controller: Option<String>,
    /// Set once a deploy cycle has failed; informational only (mirrors
    /// the original's `self.failing` flag, surfaced e.g. by a future
    /// health-check integration).
    pub failing: bool,
}

impl Reconciler {
    /// Runs the startup sequence of `spec.md` §4.5.1: reclaims or
    /// rejects a stale `/hosts/<host-id>` node, creates a fresh
    /// ephemeral one, normalizes `$HOME`, and snapshots the cluster
    /// version for logging. Does not install the `/hosts` watch —
    /// that's the caller's job (see `agent`'s `main.rs`), since it
    /// depends on the chosen runtime's task-spawning mechanics.
    pub async fn start(
        coord: &dyn Coordinator,
        host_id: String,
        role: Option<String>,
        run_dir: PathBuf,
    ) -> Result<Self, Error> {
        let persisted_version = status::read_host_version(&run_dir)?;
        let host_path = format!("/hosts/{host_id}");

        let mut version = persisted_version;
        if coord.exists(&host_path).await? {
            if coord.is_ephemeral(&host_path).await? {
                return Err(Error::AnotherAgentRunning);
            }
            let props = coord.get_properties(&host_path).await?;
            if let Some(v) = props.get("version") {
                version = Some(v.clone());
            }
            coord.delete(&host_path).await?;
        }

        let host_fqdn = local_hostname();

        normalize_home();

        coord.create(&host_path, "", zk::CreateOptions::ephemeral()).await?;
        let mut props = zk::Properties::new();
        props.insert("name".to_string(), zk::Value::from(host_fqdn.clone()));
        props.insert("version".to_string(), version.clone().unwrap_or(zk::Value::Null));
        if let Some(role) = &role {
            props.insert("role".to_string(), zk::Value::from(role.clone()));
        }
        coord.set_properties(&host_path, props).await?;

        let cluster_version = coord
            .get_properties("/hosts")
            .await?
            .get("version")
            .cloned()
            .unwrap_or(zk::Value::Null);
        log::info!(
            "agent started: host {host_id:?} ({host_fqdn:?}), cluster version {cluster_version}, host version {:?}",
            version.unwrap_or(zk::Value::Null)
        );

        Ok(Self {
            host_id,
            host_fqdn,
            role,
            run_dir,
            role_controller: None,
            failing: false,
        })
    }
}

/// Approximates the host's FQDN via `gethostname(2)`. The teacher's
/// stack has no dedicated FQDN-resolution crate; `nix` is already a
/// workspace dependency and this is the same primitive the original
/// used (`socket.getfqdn()`, which itself falls back to
/// `gethostname()` when no better answer is available).
fn local_hostname() -> String {
    nix::unistd::gethostname()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|e| {
            log::warn!("gethostname failed: {e}, using \"localhost\"");
            "localhost".to_string()
        })
}

fn normalize_home() {
    let needs_reset = match std::env::var("HOME") {
        Ok(home) => home != "/root",
        Err(_) => true,
    };
    if needs_reset {
        log::warn!("normalizing $HOME to /root");
        std::env::set_var("HOME", "/root");
    }
}
