// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use thiserror::Error;
use zk::{Coordinator, CreateOptions, Value};

use crate::{canonical, import, lock};

#[derive(Debug, Parser)]
#[command(name = "zksync", about = "Reference driver: import a canonical tree description into the coordination store")]
struct Args {
    #[arg(short = 'u', long, value_name = "URL", help = "Canonical source URL")]
    url: String,
    #[arg(short = 'd', long, help = "Don't actually modify the coordination tree")]
    dry_run: bool,
    #[arg(short = 'f', long, help = "Resync even if convergence or version checks would refuse")]
    force: bool,
    #[arg(short = 'z', long, value_name = "ADDR")]
    zookeeper: Option<String>,
    #[arg(long, value_name = "DIR", default_value = "/var/lib/zkdeploy", help = "Directory holding the driver's lock and tombstone files")]
    state_dir: PathBuf,
}

#[derive(Debug, Error)]
enum Error {
    #[error(transparent)]
    Lock(#[from] lock::Error),
    #[error(transparent)]
    Zk(#[from] zk::Error),
    #[error(transparent)]
    Canonical(#[from] canonical::Error),
    #[error("refusing to resync: {0}")]
    Refused(String),
}

pub fn run() -> i32 {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("building runtime: {e}");
            return 1;
        }
    };

    match runtime.block_on(sync_with_canonical(&args)) {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            if let Err(write_err) = lock::write_tombstone(&tombstone_path(&args.state_dir), &e.to_string()) {
                warn!("writing tombstone: {write_err}");
            }
            1
        }
    }
}

fn lock_path(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("sync.lock")
}

fn tombstone_path(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("sync.tombstone")
}

fn connect(zookeeper: Option<&str>) -> Arc<dyn Coordinator> {
    if let Some(addr) = zookeeper {
        log::debug!("expecting coordination store at {addr}");
    }
    Arc::new(zk::Memory::new())
}

/// Mirrors the original `sync_with_canonical`: checks refusal
/// conditions, imports every `.zk`/`.zkx` file under the canonical
/// URL, then bumps `/hosts.version` to the new revision.
async fn sync_with_canonical(args: &Args) -> Result<(), Error> {
    std::fs::create_dir_all(&args.state_dir).map_err(|e| lock::Error::Io(args.state_dir.clone(), e))?;
    let _driver_lock = lock::acquire(&lock_path(&args.state_dir))?;

    let coord = connect(args.zookeeper.as_deref());

    let cluster_version = get_or_init_hosts_version(coord.as_ref()).await?;
    if cluster_version.is_all_stop() {
        warn!("ALL STOP, cluster version is null");
        if !args.force {
            return Err(Error::Refused("cluster version is null, pass --force to proceed anyway".to_string()));
        }
    }

    let vcs_revision = canonical::revision(&args.url)?;
    info!("canonical revision: {vcs_revision}");
    info!("cluster version: {cluster_version}");

    if cluster_version.to_string() == vcs_revision {
        info!("already in sync, nothing to do");
        return Ok(());
    }

    if !args.force {
        check_convergence(coord.as_ref(), &cluster_version).await?;
    }

    let hosts_lock = acquire_hosts_lock(coord.as_ref()).await;
    let hosts_lock = match hosts_lock {
        Ok(lock) => lock,
        Err(zk::Error::NodeExists(_)) => {
            return Err(Error::Refused("couldn't obtain /hosts-lock, another sync is in flight".to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    info!("version mismatch detected, resyncing");
    let files = canonical::list_files(&args.url)?;
    for file in &files {
        let verb = if file.trim { "importing (trim)" } else { "importing (overlay)" };
        if args.dry_run {
            info!("{verb} {} (dry run, no action taken)", file.name);
        } else {
            info!("{verb} {}", file.name);
            let entries = import::parse(&file.contents);
            import::apply(coord.as_ref(), &entries, file.trim).await?;
        }
    }

    if !args.dry_run {
        let mut props = coord.get_properties("/hosts").await?;
        props.insert("version".to_string(), Value::from(vcs_revision));
        coord.set_properties("/hosts", props).await?;
        lock::clear_tombstone(&tombstone_path(&args.state_dir))?;
    }

    coord.delete(&hosts_lock).await?;
    Ok(())
}

async fn get_or_init_hosts_version(coord: &dyn Coordinator) -> Result<Value, Error> {
    if !coord.exists("/hosts").await? {
        coord.create("/hosts", "", CreateOptions::default()).await?;
        let mut props = zk::Properties::new();
        props.insert("version".to_string(), Value::from("initial"));
        coord.set_properties("/hosts", props).await?;
        return Ok(Value::from("initial"));
    }
    Ok(coord.get_properties("/hosts").await?.get("version").cloned().unwrap_or(Value::Null))
}

/// Refuses if any live host's `version` property disagrees with the
/// cluster's current version: deploying a new tree on top of hosts
/// that haven't converged on the last one would hide a live failure.
async fn check_convergence(coord: &dyn Coordinator, cluster_version: &Value) -> Result<(), Error> {
    for host in coord.get_children("/hosts").await.unwrap_or_default() {
        let host_path = format!("/hosts/{host}");
        let host_version = coord.get_properties(&host_path).await?.get("version").cloned().unwrap_or(Value::Null);
        if &host_version != cluster_version {
            return Err(Error::Refused(format!(
                "host {host} has not converged ({host_version} -> {cluster_version})"
            )));
        }
    }
    Ok(())
}

/// Non-blocking acquire of the cluster-level `/hosts-lock`: unlike
/// `agentlock`'s per-deployment mutex, a busy sync driver refuses
/// instead of queueing.
async fn acquire_hosts_lock(coord: &dyn Coordinator) -> Result<String, zk::Error> {
    coord.create("/hosts-lock", "", CreateOptions::ephemeral()).await
}
