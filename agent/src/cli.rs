// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use pkgbackend::{Yum, VcsRegistry};
use zk::Coordinator;

#[derive(Debug, Parser)]
#[command(name = "agent", about = "Per-host zkdeploy reconciliation agent")]
struct Args {
    #[arg(short, long, help = "Raise log verbosity to debug")]
    verbose: bool,
    #[arg(long, help = "Perform exactly one deploy cycle, then exit")]
    run_once: bool,
    #[arg(long = "assert-zookeeper-address", value_name = "ADDR")]
    assert_zookeeper_address: Option<String>,
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
}

/// Parses arguments, loads configuration, and runs the agent. Returns
/// the process exit code rather than calling `std::process::exit`
/// directly, so `main` stays a one-liner.
pub fn run() -> i32 {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = match agentconfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("loading {:?}: {e}", args.config);
            return e.exit_code();
        }
    };

    if let Some(addr) = &args.assert_zookeeper_address {
        info!("expecting coordination store at {addr}");
        // Every subprocess this agent spawns (installer scripts, role
        // scripts, the package manager, the after-hook) inherits this
        // from the environment, same as `Command` inherits `$HOME`.
        std::env::set_var("ZC_ZK_CONNECTION_STRING", addr);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("building runtime: {e}");
            return 1;
        }
    };

    match runtime.block_on(run_agent(config, args.run_once)) {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            1
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Reconcile(#[from] reconcile::Error),
}

async fn run_agent(config: agentconfig::Config, run_once: bool) -> Result<(), Error> {
    let coord: Arc<dyn Coordinator> = connect();
    let root = hostfs::Root::from_env();
    let pm = Yum;
    let vcs = VcsRegistry::new();

    let mut reconciler =
        reconcile::Reconciler::start(coord.as_ref(), config.host_id.clone(), config.role.clone(), config.run_directory.clone())
            .await?;

    if run_once {
        reconcile::deploy(&mut reconciler, coord.as_ref(), &pm, &vcs, &root, config.after.as_deref()).await?;
        return Ok(());
    }

    run_watch_loop(&mut reconciler, coord, pm, vcs, root, config.after).await
}

/// Constructs the coordination client. This workspace ships only the
/// in-process [`zk::Memory`] double; wiring an actual ZooKeeper
/// ensemble is a deployment-time concern pulling in a client library
/// outside this workspace (see `zk`'s module docs).
fn connect() -> Arc<dyn Coordinator> {
    Arc::new(zk::Memory::new())
}

/// Installs the `/hosts` watch and drains the single-slot collapsing
/// queue it feeds, per `spec.md` §4.5.1/§5: a backlog of watch firings
/// collapses to "a deployment is pending", never to N queued deploys.
async fn run_watch_loop(
    reconciler: &mut reconcile::Reconciler,
    coord: Arc<dyn Coordinator>,
    pm: Yum,
    vcs: VcsRegistry,
    root: hostfs::Root,
    after: Option<Vec<String>>,
) -> Result<(), Error> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);

    coord
        .watch_properties(
            "/hosts",
            Box::new(move |props| {
                let pending = props.get("version").map(|v| !v.is_all_stop()).unwrap_or(false);
                if pending {
                    let _ = tx.try_send(());
                }
            }),
        )
        .await?;

    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("installing SIGTERM handler");

    loop {
        tokio::select! {
            _ = rx.recv() => {
                if let Err(e) = reconcile::deploy(reconciler, coord.as_ref(), &pm, &vcs, &root, after.as_deref()).await {
                    error!("deploy cycle failed: {e}");
                }
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                let host_path = format!("/hosts/{}", reconciler.host_id);
                let _ = coord.delete(&host_path).await;
                return Ok(());
            }
        }
    }
}
