// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! [`Client`] wraps a [`Coordinator`] and re-issues watches after a
//! reconnect, so callers never have to think about connection loss.

use std::sync::Arc;

use log::warn;
use tokio::sync::Mutex;

use crate::{Coordinator, CreateOptions, Error, Properties};

type WatchCallback = Box<dyn Fn(Properties) + Send + Sync>;

struct Watch {
    path: String,
    cb: Arc<WatchCallback>,
}

/// A reconnect-aware wrapper around a [`Coordinator`].
pub struct Client<C> {
    inner: C,
    watches: Mutex<Vec<Watch>>,
}

impl<C: Coordinator> Client<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            watches: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Register a watch, remembering it so it can be re-issued after a
    /// [`Error::ConnectionLost`] is observed by [`Client::reconnect`].
    pub async fn watch_properties(
        &self,
        path: &str,
        cb: WatchCallback,
    ) -> Result<(), Error> {
        let cb = Arc::new(cb);
        {
            let mut watches = self.watches.lock().await;
            watches.push(Watch {
                path: path.to_string(),
                cb: cb.clone(),
            });
        }
        let cb_for_call = cb.clone();
        self.inner
            .watch_properties(path, Box::new(move |props| cb_for_call(props)))
            .await
    }

    /// Re-issue every outstanding watch. Call this after observing
    /// [`Error::ConnectionLost`] from any other [`Coordinator`] call.
    pub async fn reconnect(&self) -> Result<(), Error> {
        let watches = self.watches.lock().await;
        for watch in watches.iter() {
            warn!("re-issuing watch on {} after reconnect", watch.path);
            let cb = watch.cb.clone();
            self.inner
                .watch_properties(&watch.path, Box::new(move |props| cb(props)))
                .await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<C: Coordinator> Coordinator for Client<C> {
    async fn get_children(&self, path: &str) -> Result<Vec<String>, Error> {
        self.inner.get_children(path).await
    }

    async fn get_properties(&self, path: &str) -> Result<Properties, Error> {
        self.inner.get_properties(path).await
    }

    async fn set_properties(&self, path: &str, props: Properties) -> Result<(), Error> {
        self.inner.set_properties(path, props).await
    }

    async fn create(
        &self,
        path: &str,
        value: &str,
        opts: CreateOptions,
    ) -> Result<String, Error> {
        self.inner.create(path, value, opts).await
    }

    async fn delete(&self, path: &str) -> Result<(), Error> {
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool, Error> {
        self.inner.exists(path).await
    }

    async fn is_ephemeral(&self, path: &str) -> Result<bool, Error> {
        self.inner.is_ephemeral(path).await
    }

    async fn walk(&self, root: &str) -> Result<Vec<String>, Error> {
        self.inner.walk(root).await
    }

    async fn watch_properties(
        &self,
        path: &str,
        cb: WatchCallback,
    ) -> Result<(), Error> {
        Client::watch_properties(self, path, cb).await
    }
}
