// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! VCS-checkout-backed deployments, dispatched by URL scheme the same
//! way `moss::registry::Plugin` dispatches by content kind: a closed
//! enum rather than a trait object, since the full set of backends is
//! fixed at compile time.

use std::collections::BTreeMap;
use std::path::Path;

use crate::Error;

pub mod centralized;
pub mod dvcs;

pub use centralized::Subversion;
pub use dvcs::Git;

/// A VCS-backed install source.
#[derive(Debug, Clone, Copy)]
pub enum Vcs {
    Dvcs(dvcs::Git),
    Centralized(centralized::Subversion),
}

impl Vcs {
    pub fn is_under(&self, path: &Path) -> bool {
        match self {
            Vcs::Dvcs(g) => g.is_under(path),
            Vcs::Centralized(s) => s.is_under(path),
        }
    }

    pub fn current_version(&self, path: &Path) -> Result<Option<String>, Error> {
        match self {
            Vcs::Dvcs(g) => g.current_version(path),
            Vcs::Centralized(s) => s.current_version(path),
        }
    }

    pub fn update(&self, path: &Path, version: &str) -> Result<(), Error> {
        match self {
            Vcs::Dvcs(g) => g.update(path, version),
            Vcs::Centralized(s) => s.update(path, version),
        }
    }
}

/// Scheme (the substring before the first `:`) that selects a [`Vcs`]
/// backend, e.g. `git` in `git://repo#branch`, `svn` in `svn:url`.
pub fn scheme_of(version: &str) -> Option<&str> {
    version.split_once(':').map(|(scheme, _)| scheme)
}

/// Maps a URL scheme prefix to its [`Vcs`] backend. The in-scope subset
/// of the original's `zope.component` utility registration — populated
/// once, never mutated after construction.
#[derive(Debug, Clone)]
pub struct VcsRegistry(BTreeMap<&'static str, Vcs>);

impl Default for VcsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VcsRegistry {
    pub fn new() -> Self {
        let mut backends = BTreeMap::new();
        backends.insert("git", Vcs::Dvcs(Git));
        backends.insert("svn", Vcs::Centralized(Subversion));
        backends.insert("svn+ssh", Vcs::Centralized(Subversion));
        Self(backends)
    }

    /// Looks up the backend for `version`'s scheme, if any.
    pub fn for_version(&self, version: &str) -> Option<&Vcs> {
        let scheme = scheme_of(version)?;
        self.0.get(scheme)
    }
}
