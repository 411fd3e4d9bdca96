// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `<run-dir>/host_version` (JSON-encoded last successfully applied
//! cluster version) and `<run-dir>/status` (one line:
//! `"<epoch> <pid> <version> <status-phrase>"`).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs_err as fs;
use thiserror::Error;
use zk::Value;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io at {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("parsing host_version at {0:?}")]
    Parse(PathBuf, #[source] serde_json::Error),
}

fn host_version_path(run_dir: &Path) -> PathBuf {
    run_dir.join("host_version")
}

fn status_path(run_dir: &Path) -> PathBuf {
    run_dir.join("status")
}

pub fn read_host_version(run_dir: &Path) -> Result<Option<Value>, Error> {
    let path = host_version_path(run_dir);
    let contents = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(path, e)),
    };
    let json: serde_json::Value = serde_json::from_str(contents.trim()).map_err(|e| Error::Parse(path, e))?;
    Ok(Some(json_to_value(json)))
}

pub fn write_host_version(run_dir: &Path, version: &Value) -> Result<(), Error> {
    let path = host_version_path(run_dir);
    let json = value_to_json(version);
    fs::write(&path, json.to_string()).map_err(|e| Error::Io(path, e))
}

/// Writes `"<epoch> <pid> <version> <status-phrase>"`.
pub fn write_status(run_dir: &Path, version: &Value, phrase: &str) -> Result<(), Error> {
    let path = status_path(run_dir);
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let pid = std::process::id();
    let line = format!("{epoch} {pid} {version} {phrase}");
    fs::write(&path, line).map_err(|e| Error::Io(path, e))
}

/// Parses a status line back into `(epoch, pid, version, phrase)`, used
/// by the `monitor` CLI.
pub fn read_status(run_dir: &Path) -> Result<Option<(u64, u32, String, String)>, Error> {
    let path = status_path(run_dir);
    let contents = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(path, e)),
    };

    let mut parts = contents.trim().splitn(4, ' ');
    let epoch = parts.next().unwrap_or_default().parse().unwrap_or(0);
    let pid = parts.next().unwrap_or_default().parse().unwrap_or(0);
    let version = parts.next().unwrap_or_default().to_string();
    let phrase = parts.next().unwrap_or_default().to_string();

    Ok(Some((epoch, pid, version, phrase)))
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Str(s) => serde_json::Value::String(s.clone()),
    }
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Int(n.as_i64().unwrap_or_default()),
        serde_json::Value::String(s) => Value::Str(s),
        other => Value::Str(other.to_string()),
    }
}
