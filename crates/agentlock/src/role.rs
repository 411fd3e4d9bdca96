// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Persistent per-role lock at `/role-locks/<role>`. Unlike
//! [`crate::NodeLock`], entries are non-ephemeral and outlive the
//! holding agent's session on failure, by design: a role deploy that
//! dies mid-flight must keep the role held until a human or the sync
//! driver resets it.

use log::debug;
use zk::{Coordinator, CreateOptions, Properties, Value};

use crate::{wait_for_smallest, Error};

pub struct RoleLock {
    my_node: String,
}

impl RoleLock {
    pub async fn acquire(
        coord: &dyn Coordinator,
        role: &str,
        host_id: &str,
        hostname: &str,
    ) -> Result<Self, Error> {
        let parent = format!("/role-locks/{role}");
        if !coord.exists(&parent).await? {
            return Err(Error::MissingRoleLocksParent(role.to_string()));
        }

        let prefix = format!("{parent}/lock-");
        let created = coord.create(&prefix, "", CreateOptions::sequential()).await?;

        let existing = Self::find_existing_entry(coord, &parent, &created, host_id).await?;

        let my_node = match existing {
            Some(existing) => {
                debug!(
                    "role {role}: adopting existing lock entry {existing:?} for host {host_id:?}, discarding {created:?}"
                );
                coord.delete(&created).await?;
                existing
            }
            None => {
                let mut props = Properties::new();
                props.insert("requestor".to_string(), Value::from(host_id));
                props.insert("hostname".to_string(), Value::from(hostname));
                coord.set_properties(&created, props).await?;
                created
            }
        };

        wait_for_smallest(coord, &parent, &my_node).await?;

        Ok(Self { my_node })
    }

    async fn find_existing_entry(
        coord: &dyn Coordinator,
        parent: &str,
        just_created: &str,
        host_id: &str,
    ) -> Result<Option<String>, Error> {
        for child in coord.get_children(parent).await? {
            let child_path = zk::path::join(parent, &child);
            if child_path == just_created {
                continue;
            }
            let props = coord.get_properties(&child_path).await?;
            if props.get("requestor").and_then(Value::as_str) == Some(host_id) {
                return Ok(Some(child_path));
            }
        }
        Ok(None)
    }

    /// Deletes the held entry. Call only on a successful deploy: the
    /// lock must otherwise be left in place (just drop the guard).
    pub async fn release_success(self, coord: &dyn Coordinator) -> Result<(), Error> {
        coord.delete(&self.my_node).await?;
        Ok(())
    }
}

impl Drop for RoleLock {
    fn drop(&mut self) {
        debug!(
            "role lock {:?} dropped without release_success; entry retained for reacquisition",
            self.my_node
        );
    }
}
