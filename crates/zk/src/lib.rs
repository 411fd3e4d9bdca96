// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Typed facade over a ZooKeeper-like hierarchical coordination store.
//!
//! Nothing in this crate talks to an actual ZooKeeper ensemble. [`Coordinator`]
//! is the seam: a real implementation lives outside this workspace (it needs a
//! ZooKeeper client library and a live connection), and [`memory::Memory`]
//! is the in-process double used by every test in this workspace.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub mod client;
pub mod memory;
pub mod path;

pub use client::Client;
pub use memory::Memory;

/// A single property value. Coordination properties are a flat JSON-scalar
/// map; nesting is not supported on the wire this models.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    /// `null` and `false` both gate the reconciler's worker identically
    /// (ALL-STOP), even though they remain distinct values once read back.
    pub fn is_all_stop(&self) -> bool {
        matches!(self, Value::Null | Value::Bool(false))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

pub type Properties = BTreeMap<String, Value>;

/// Options controlling how [`Coordinator::create`] behaves.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    pub ephemeral: bool,
    pub sequence: bool,
}

impl CreateOptions {
    pub fn ephemeral() -> Self {
        Self {
            ephemeral: true,
            sequence: false,
        }
    }

    pub fn sequential() -> Self {
        Self {
            ephemeral: false,
            sequence: true,
        }
    }

    pub fn ephemeral_sequential() -> Self {
        Self {
            ephemeral: true,
            sequence: true,
        }
    }
}

/// A typed facade over a ZooKeeper-like store. Every method takes an
/// absolute, `/`-separated path.
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn get_children(&self, path: &str) -> Result<Vec<String>, Error>;

    async fn get_properties(&self, path: &str) -> Result<Properties, Error>;

    async fn set_properties(&self, path: &str, props: Properties) -> Result<(), Error>;

    async fn create(
        &self,
        path: &str,
        value: &str,
        opts: CreateOptions,
    ) -> Result<String, Error>;

    async fn delete(&self, path: &str) -> Result<(), Error>;

    async fn exists(&self, path: &str) -> Result<bool, Error>;

    async fn is_ephemeral(&self, path: &str) -> Result<bool, Error>;

    /// Preorder traversal of every path under (and including) `root`.
    async fn walk(&self, root: &str) -> Result<Vec<String>, Error>;

    /// Register a watch on `path`'s properties. `cb` fires once immediately
    /// with the current snapshot (or an empty map if the node doesn't yet
    /// exist) and again every time the properties change, until `path` is
    /// deleted or the coordinator is dropped.
    async fn watch_properties(
        &self,
        path: &str,
        cb: Box<dyn Fn(Properties) + Send + Sync>,
    ) -> Result<(), Error>;

    /// Create an ephemeral child named `name` under `parent`, using `acl`
    /// as an opaque ACL descriptor (ignored by the in-memory backend).
    async fn register(&self, parent: &str, name: &str, acl: &str) -> Result<String, Error> {
        let _ = acl;
        self.create(
            &format!("{}/{}", parent.trim_end_matches('/'), name),
            "",
            CreateOptions::ephemeral(),
        )
        .await
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("no node at {0}")]
    NoNode(String),
    #[error("node already exists at {0}")]
    NodeExists(String),
    #[error("connection lost")]
    ConnectionLost,
}
