// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Reads a tree description from a canonical Subversion URL: `.zk`
//! files are trim imports, `.zkx` files are overlays. Grounded on the
//! original sync driver's `SVN` helper, which shelled out to `svn info`
//! (for the revision) and `svn ls`/`svn cat` (for the file listing).

use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("running {0:?}")]
    Spawn(String, #[source] std::io::Error),
    #[error("{0:?} exited with non-zero status")]
    NonZero(String),
    #[error("couldn't parse revision out of `svn info` output for {0:?}")]
    NoRevision(String),
}

/// One file served by the canonical source: its name (used to decide
/// trim vs. overlay) and its raw contents.
pub struct SourceFile {
    pub name: String,
    pub contents: String,
    pub trim: bool,
}

fn run(args: &[&str]) -> Result<String, Error> {
    let label = || args.join(" ");
    let output = Command::new("svn").args(args).output().map_err(|e| Error::Spawn(label(), e))?;
    if !output.status.success() {
        return Err(Error::NonZero(label()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// The canonical source's current revision, used as the new
/// `/hosts.version` once import succeeds.
pub fn revision(url: &str) -> Result<String, Error> {
    let info = run(&["info", url])?;
    info.lines()
        .find_map(|line| line.strip_prefix("Last Changed Rev:"))
        .map(|rev| rev.trim().to_string())
        .ok_or_else(|| Error::NoRevision(url.to_string()))
}

/// Every `.zk`/`.zkx` file directly under `url`, in `svn ls` order
/// (`.zk` trims first, `.zkx` overlays after, matching the original's
/// `zkfiles + zkxfiles` ordering).
pub fn list_files(url: &str) -> Result<Vec<SourceFile>, Error> {
    let listing = run(&["ls", url])?;
    let mut zk_files = Vec::new();
    let mut zkx_files = Vec::new();
    for name in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if name.ends_with(".zk") {
            zk_files.push(name.to_string());
        } else if name.ends_with(".zkx") {
            zkx_files.push(name.to_string());
        }
    }

    let mut files = Vec::new();
    for name in zk_files.into_iter().chain(zkx_files) {
        let trim = name.ends_with(".zk");
        let contents = run(&["cat", &format!("{}/{}", url.trim_end_matches('/'), name)])?;
        files.push(SourceFile { name, contents, trim });
    }
    Ok(files)
}
