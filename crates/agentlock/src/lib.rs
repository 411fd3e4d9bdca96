// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Two lock flavors built on `zk::Coordinator`'s sequential node recipe:
//! a short-lived per-deployment mutex, and a persistent per-role lock
//! remembered across agent restarts. Mirrors how
//! `moss::installation::lockfile` wraps `flock(2)` in a scoped guard,
//! translated from file locking to ZK sequential nodes.

use std::time::Duration;

use thiserror::Error;
use zk::Coordinator;

mod node;
mod role;

pub use node::{with_node_lock, NodeLock};
pub use role::RoleLock;

/// Poll interval while waiting to become the smallest sibling. The real
/// ZK recipe watches the previous sibling's deletion instead of polling;
/// `Coordinator` only exposes property watches, so this is a deliberate
/// simplification (see DESIGN.md).
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Zk(#[from] zk::Error),
    #[error("/role-locks/{0} does not exist")]
    MissingRoleLocksParent(String),
}

async fn wait_for_smallest(coord: &dyn Coordinator, parent: &str, my_node: &str) -> Result<(), Error> {
    let my_name = my_node
        .rsplit('/')
        .next()
        .expect("sequential child always has a name component")
        .to_string();

    loop {
        let mut children = coord.get_children(parent).await?;
        children.sort();
        if children.first().map(String::as_str) == Some(my_name.as_str()) {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
