// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Centralized-VCS backend, grounded on the original `svn.py` plugin:
//! `current_version` shells `svn info` and parses the `URL:` line;
//! `update` is a checkout of that URL.

use std::path::Path;

use crate::{run, run_output, Error};

#[derive(Debug, Clone, Copy)]
pub struct Subversion;

impl Subversion {
    pub fn is_under(&self, path: &Path) -> bool {
        path.join(".svn").is_dir()
    }

    pub fn current_version(&self, path: &Path) -> Result<Option<String>, Error> {
        let path_str = path.to_string_lossy();
        let Some(output) = run_output("svn", &["info", &path_str])? else {
            return Ok(None);
        };
        for line in output.lines() {
            if let Some(url) = line.strip_prefix("URL: ") {
                return Ok(Some(format!("svn:{url}")));
            }
        }
        Ok(None)
    }

    /// `version` is `svn:<url>`.
    pub fn update(&self, path: &Path, version: &str) -> Result<(), Error> {
        let url = version
            .strip_prefix("svn:")
            .ok_or_else(|| Error::MalformedVersion(version.to_string()))?;
        let path_str = path.to_string_lossy();
        run("svn", &["co", url, &path_str])
    }
}
