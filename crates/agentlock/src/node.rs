// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Short-lived per-application mutex at `/agent-locks/<flat-path>`: a
//! plain ephemeral sequential child, released at the end of one
//! deployment attempt.

use std::future::Future;

use log::warn;
use zk::{Coordinator, CreateOptions};

use crate::{wait_for_smallest, Error};

/// A held `/agent-locks/<flat-path>` slot. Construct via
/// [`NodeLock::acquire`], release via [`NodeLock::release`] — prefer
/// [`with_node_lock`], which guarantees release on every exit path.
pub struct NodeLock {
    my_node: String,
    released: bool,
}

impl NodeLock {
    pub async fn acquire(coord: &dyn Coordinator, flat_path: &str) -> Result<Self, Error> {
        let parent = format!("/agent-locks/{flat_path}");
        if !coord.exists(&parent).await? {
            match coord.create(&parent, "", CreateOptions::default()).await {
                Ok(_) => {}
                Err(zk::Error::NodeExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let prefix = format!("{parent}/lock-");
        let my_node = coord.create(&prefix, "", CreateOptions::ephemeral_sequential()).await?;
        wait_for_smallest(coord, &parent, &my_node).await?;

        Ok(Self {
            my_node,
            released: false,
        })
    }

    /// Deletes the held entry. Always released, success or failure: the
    /// node lock carries no distinction between those two outcomes,
    /// unlike [`crate::RoleLock`].
    pub async fn release(mut self, coord: &dyn Coordinator) {
        if let Err(e) = coord.delete(&self.my_node).await {
            warn!("releasing node lock {:?}: {e}", self.my_node);
        }
        self.released = true;
    }
}

impl Drop for NodeLock {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "node lock {:?} dropped without release; relying on ephemeral expiry",
                self.my_node
            );
        }
    }
}

/// Acquires `/agent-locks/<flat_path>`, runs `body`, and releases the
/// lock whether `body` succeeded or failed. Generic over the body's
/// error type so callers can run fallible work from their own crate
/// without wrapping every `?` in [`Error`] first.
pub async fn with_node_lock<F, Fut, T, E>(coord: &dyn Coordinator, flat_path: &str, body: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Error>,
{
    let lock = NodeLock::acquire(coord, flat_path).await.map_err(E::from)?;
    let result = body().await;
    lock.release(coord).await;
    result
}
