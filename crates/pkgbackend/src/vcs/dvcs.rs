// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! DVCS backend, grounded on the original `git.py` plugin: clone if
//! absent, else pull; checkout `<refspec>`; records the full version
//! string in a sidecar file so branch switches are detectable by string
//! comparison alone.

use std::path::Path;

use fs_err as fs;

use crate::{run, run_in_dir, Error};

const VERSION_MARKER: &str = ".zkdeploy-version";

#[derive(Debug, Clone, Copy)]
pub struct Git;

impl Git {
    pub fn is_under(&self, path: &Path) -> bool {
        path.join(".git").is_dir()
    }

    pub fn current_version(&self, path: &Path) -> Result<Option<String>, Error> {
        let marker = path.join(".git").join(VERSION_MARKER);
        match fs::read_to_string(&marker) {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(marker, e)),
        }
    }

    /// `version` is `git://<repo>#<refspec>`.
    pub fn update(&self, path: &Path, version: &str) -> Result<(), Error> {
        if path.is_dir() {
            run_in_dir(path, "git", &["pull", "origin", "-a"])?;
            return Ok(());
        }

        let rest = version
            .strip_prefix("git://")
            .ok_or_else(|| Error::MalformedVersion(version.to_string()))?;
        let (repo, refspec) = rest
            .rsplit_once('#')
            .ok_or_else(|| Error::MalformedVersion(version.to_string()))?;

        let path_str = path.to_string_lossy();
        run("git", &["clone", repo, &path_str])?;

        let marker = path.join(".git").join(VERSION_MARKER);
        fs::write(&marker, version).map_err(|e| Error::Io(marker, e))?;

        run_in_dir(path, "git", &["checkout", refspec])?;

        Ok(())
    }
}
