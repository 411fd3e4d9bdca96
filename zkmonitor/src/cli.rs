// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use log::error;
use tui::Stylize;
use zk::{Coordinator, Value};

#[derive(Debug, Parser)]
#[command(name = "monitor", about = "One-shot health check for a zkdeploy agent")]
struct Args {
    #[arg(short, long, default_value_t = 200, help = "Seconds of inactivity before warning")]
    warn: u64,
    #[arg(short, long, default_value_t = 600, help = "Seconds of inactivity before erroring")]
    error: u64,
    #[arg(short, long, value_name = "ADDR")]
    zookeeper: Option<String>,
    #[arg(value_name = "CONFIG")]
    config: std::path::PathBuf,
}

pub fn run() -> i32 {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let config = match agentconfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("loading {:?}: {e}", args.config);
            return e.exit_code();
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("building runtime: {e}");
            return 1;
        }
    };

    let (code, message) = runtime.block_on(check(&config, args.warn, args.error, args.zookeeper.as_deref()));

    let styled = match code {
        0 => message.green().to_string(),
        1 => message.yellow().to_string(),
        _ => message.red().to_string(),
    };
    println!("{styled}");
    code
}

/// Connects to the coordination store. See `agent`'s `connect()` for why
/// this is the in-process double rather than a live ensemble client.
fn connect(zookeeper: Option<&str>) -> std::sync::Arc<dyn Coordinator> {
    if let Some(addr) = zookeeper {
        log::debug!("expecting coordination store at {addr}");
    }
    std::sync::Arc::new(zk::Memory::new())
}

/// Implements `spec.md` §6's exit-code table. Returns the process exit
/// code alongside the single line to print to stdout.
async fn check(config: &agentconfig::Config, warn: u64, error_threshold: u64, zookeeper: Option<&str>) -> (i32, String) {
    let coord = connect(zookeeper);

    let cluster_version = match coord.get_properties("/hosts").await {
        Ok(props) => props.get("version").cloned().unwrap_or(Value::Null),
        Err(e) => return (2, format!("reading cluster version: {e}")),
    };
    if cluster_version.is_all_stop() {
        return (1, "cluster version is null".to_string());
    }

    let (epoch, _pid, version, phrase) = match reconcile::status::read_status(&config.run_directory) {
        Ok(Some(status)) => status,
        Ok(None) => return (2, "no status file".to_string()),
        Err(e) => return (2, format!("reading status: {e}")),
    };

    if phrase == "error" {
        return (2, format!("error deploying {version}"));
    }

    if phrase == "done" {
        let host_path = format!("/hosts/{}", config.host_id);
        let host_version = match coord.get_properties(&host_path).await {
            Ok(props) => props.get("version").cloned().unwrap_or(Value::Null),
            Err(e) => return (2, format!("reading host version: {e}")),
        };
        return if version == cluster_version.to_string() && version == host_version.to_string() {
            (0, version)
        } else {
            (2, format!("version mismatch: status={version} cluster={cluster_version} host={host_version}"))
        };
    }

    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(epoch);
    let elapsed = now.saturating_sub(epoch);

    if elapsed > error_threshold {
        (2, format!("too long deploying {version} ({phrase}) {elapsed} > {error_threshold}"))
    } else if elapsed > warn {
        (1, format!("too long deploying {version} ({phrase}) {elapsed} > {warn}"))
    } else {
        (0, phrase)
    }
}
