// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! An entirely in-process [`Coordinator`] double.
//!
//! Exists purely so the reconciler, lock manager and binaries can be
//! exercised without a real ZooKeeper ensemble, the same role
//! `registry::plugin::test::Plugin` plays for `moss`'s `Registry` in the
//! teacher codebase.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::trace;
use tokio::sync::RwLock;

use crate::{Coordinator, CreateOptions, Error, Properties};

#[derive(Debug, Clone)]
struct Node {
    properties: Properties,
    ephemeral: bool,
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    children: BTreeMap<String, Vec<String>>,
    seq_counters: BTreeMap<String, u64>,
    watches: BTreeMap<String, Vec<Box<dyn Fn(Properties) + Send + Sync>>>,
}

/// An in-memory [`Coordinator`]. Cloning shares the underlying tree.
#[derive(Clone)]
pub struct Memory(Arc<RwLock<Inner>>);

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner.nodes.insert(
            "/".to_string(),
            Node {
                properties: Properties::new(),
                ephemeral: false,
            },
        );
        Self(Arc::new(RwLock::new(inner)))
    }

    async fn fire_watches(&self, path: &str) {
        let (callbacks_len, props) = {
            let inner = self.0.read().await;
            let props = inner
                .nodes
                .get(path)
                .map(|n| n.properties.clone())
                .unwrap_or_default();
            let len = inner.watches.get(path).map(|v| v.len()).unwrap_or(0);
            (len, props)
        };
        if callbacks_len == 0 {
            return;
        }
        let inner = self.0.read().await;
        if let Some(callbacks) = inner.watches.get(path) {
            for cb in callbacks {
                cb(props.clone());
            }
        }
    }
}

#[async_trait]
impl Coordinator for Memory {
    async fn get_children(&self, path: &str) -> Result<Vec<String>, Error> {
        let inner = self.0.read().await;
        if !inner.nodes.contains_key(path) {
            return Err(Error::NoNode(path.to_string()));
        }
        Ok(inner.children.get(path).cloned().unwrap_or_default())
    }

    async fn get_properties(&self, path: &str) -> Result<Properties, Error> {
        let inner = self.0.read().await;
        inner
            .nodes
            .get(path)
            .map(|n| n.properties.clone())
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }

    async fn set_properties(&self, path: &str, props: Properties) -> Result<(), Error> {
        {
            let mut inner = self.0.write().await;
            let node = inner
                .nodes
                .get_mut(path)
                .ok_or_else(|| Error::NoNode(path.to_string()))?;
            node.properties = props;
        }
        self.fire_watches(path).await;
        Ok(())
    }

    async fn create(
        &self,
        path: &str,
        value: &str,
        opts: CreateOptions,
    ) -> Result<String, Error> {
        let mut props = Properties::new();
        if !value.is_empty() {
            props.insert("__value".to_string(), crate::Value::Str(value.to_string()));
        }

        let actual_path = {
            let mut inner = self.0.write().await;

            let parent = crate::path::parent_of(path)
                .ok_or_else(|| Error::NoNode(path.to_string()))?
                .to_string();
            if !inner.nodes.contains_key(&parent) {
                return Err(Error::NoNode(parent));
            }

            let actual_path = if opts.sequence {
                let counter = inner.seq_counters.entry(path.to_string()).or_insert(0);
                let n = *counter;
                *counter += 1;
                format!("{path}{n:010}")
            } else {
                path.to_string()
            };

            if inner.nodes.contains_key(&actual_path) {
                return Err(Error::NodeExists(actual_path));
            }

            inner.nodes.insert(
                actual_path.clone(),
                Node {
                    properties: props,
                    ephemeral: opts.ephemeral,
                },
            );
            inner.children.entry(actual_path.clone()).or_default();
            let child_name = actual_path.rsplit('/').next().unwrap_or_default().to_string();
            inner.children.entry(parent).or_default().push(child_name);

            trace!("created {actual_path} (ephemeral={}, sequence={})", opts.ephemeral, opts.sequence);

            actual_path
        };

        if let Some(parent) = crate::path::parent_of(path) {
            self.fire_watches(parent).await;
        }

        Ok(actual_path)
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        {
            let mut inner = self.0.write().await;
            if inner.nodes.remove(path).is_none() {
                return Err(Error::NoNode(path.to_string()));
            }
            inner.children.remove(path);
            if let Some(parent) = crate::path::parent_of(path) {
                let name = path.rsplit('/').next().unwrap_or_default();
                if let Some(siblings) = inner.children.get_mut(parent) {
                    siblings.retain(|c| c != name);
                }
            }
        }
        self.fire_watches(path).await;
        if let Some(parent) = crate::path::parent_of(path) {
            self.fire_watches(parent).await;
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, Error> {
        Ok(self.0.read().await.nodes.contains_key(path))
    }

    async fn is_ephemeral(&self, path: &str) -> Result<bool, Error> {
        let inner = self.0.read().await;
        inner
            .nodes
            .get(path)
            .map(|n| n.ephemeral)
            .ok_or_else(|| Error::NoNode(path.to_string()))
    }

    async fn walk(&self, root: &str) -> Result<Vec<String>, Error> {
        let inner = self.0.read().await;
        if !inner.nodes.contains_key(root) {
            return Err(Error::NoNode(root.to_string()));
        }
        let mut out = vec![];
        let mut stack = vec![root.to_string()];
        while let Some(path) = stack.pop() {
            out.push(path.clone());
            if let Some(children) = inner.children.get(&path) {
                for child in children.iter().rev() {
                    stack.push(crate::path::join(&path, child));
                }
            }
        }
        Ok(out)
    }

    async fn watch_properties(
        &self,
        path: &str,
        cb: Box<dyn Fn(Properties) + Send + Sync>,
    ) -> Result<(), Error> {
        let snapshot = {
            let mut inner = self.0.write().await;
            inner.watches.entry(path.to_string()).or_default().push(cb);
            inner
                .nodes
                .get(path)
                .map(|n| n.properties.clone())
                .unwrap_or_default()
        };
        let inner = self.0.read().await;
        if let Some(callbacks) = inner.watches.get(path) {
            if let Some(last) = callbacks.last() {
                last(snapshot);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::Value;

    use super::*;

    #[tokio::test]
    async fn sequential_ephemeral_children_are_ordered() {
        let zk = Memory::new();
        zk.create("/agent-locks", "", CreateOptions::default())
            .await
            .unwrap();
        let a = zk
            .create("/agent-locks/app-", "", CreateOptions::ephemeral_sequential())
            .await
            .unwrap();
        let b = zk
            .create("/agent-locks/app-", "", CreateOptions::ephemeral_sequential())
            .await
            .unwrap();
        assert!(a < b);
        let children = zk.get_children("/agent-locks").await.unwrap();
        assert_eq!(children.len(), 2);
    }

    #[tokio::test]
    async fn watch_fires_immediately_then_on_change() {
        let zk = Memory::new();
        zk.create("/hosts", "", CreateOptions::default()).await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        zk.watch_properties(
            "/hosts",
            Box::new(move |_props| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let mut props = Properties::new();
        props.insert("version".to_string(), Value::Int(2));
        zk.set_properties("/hosts", props).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn walk_yields_every_descendant() {
        let zk = Memory::new();
        zk.create("/cust", "", CreateOptions::default()).await.unwrap();
        zk.create("/cust/app", "", CreateOptions::default())
            .await
            .unwrap();
        zk.create("/cust/app/deploy", "", CreateOptions::default())
            .await
            .unwrap();

        let paths = zk.walk("/cust").await.unwrap();
        assert_eq!(paths, vec!["/cust", "/cust/app", "/cust/app/deploy"]);
    }

    #[tokio::test]
    async fn delete_removes_node_and_parent_child_entry() {
        let zk = Memory::new();
        zk.create("/hosts", "", CreateOptions::default()).await.unwrap();
        zk.create(
            "/hosts/h1",
            "",
            CreateOptions::ephemeral(),
        )
        .await
        .unwrap();
        zk.delete("/hosts/h1").await.unwrap();
        assert!(!zk.exists("/hosts/h1").await.unwrap());
        assert!(zk.get_children("/hosts").await.unwrap().is_empty());
    }
}
