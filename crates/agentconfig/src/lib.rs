// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Loads the `zkdeployment` section of an `.ini`-style configuration
//! file, resolving each value as a literal, a `file://` path, or an
//! `http(s)://` URL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io at {0:?}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("missing required config value {0:?}")]
    Missing(&'static str),
    #[error("no [zkdeployment] section in {0:?}")]
    MissingSection(PathBuf),
    #[error("fetching {0:?}")]
    Http(String, #[source] reqwest::Error),
    #[error("{0:?} returned HTTP {1}")]
    HttpStatus(String, reqwest::StatusCode),
}

impl Error {
    /// The process exit code a configuration error should produce, per
    /// `spec.md` §6: missing required values exit with code 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Missing(_) | Error::MissingSection(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host_id: String,
    pub run_directory: PathBuf,
    pub role: Option<String>,
    pub after: Option<Vec<String>>,
}

/// Reads `path` and resolves the `zkdeployment` section into a
/// [`Config`]. Each value may be a literal string, a `file://<path>`
/// indirection, or an `http(s)://` URL fetched with a blocking client
/// (config loading happens once at startup, before any async runtime
/// is guaranteed to be running).
pub fn load(path: &Path) -> Result<Config, Error> {
    let contents = fs_err::read_to_string(path).map_err(|e| Error::Io(path.to_path_buf(), e))?;
    let section = parse_section(&contents, "zkdeployment").ok_or_else(|| Error::MissingSection(path.to_path_buf()))?;

    let host_id = require(&section, "host-id")?;
    let run_directory = require(&section, "run-directory")?;
    let role = optional(&section, "role")?;
    let after = optional(&section, "after")?.map(|s| split_shell_words(&s));

    Ok(Config {
        host_id,
        run_directory: PathBuf::from(run_directory),
        role,
        after,
    })
}

fn require(section: &HashMap<String, String>, key: &'static str) -> Result<String, Error> {
    match section.get(key) {
        Some(raw) => resolve(raw)?.ok_or(Error::Missing(key)),
        None => Err(Error::Missing(key)),
    }
}

fn optional(section: &HashMap<String, String>, key: &str) -> Result<Option<String>, Error> {
    match section.get(key) {
        Some(raw) => resolve(raw),
        None => Ok(None),
    }
}

/// Resolves one config value. `file://` reads the referenced file;
/// `http(s)://` fetches it (404 resolves to `None`, 200 to the body);
/// anything else is the literal value.
fn resolve(raw: &str) -> Result<Option<String>, Error> {
    if let Some(path) = raw.strip_prefix("file://") {
        let path = PathBuf::from(path);
        return fs_err::read_to_string(&path)
            .map(|s| Some(s.trim().to_string()))
            .map_err(|e| Error::Io(path, e));
    }

    if raw.starts_with("http://") || raw.starts_with("https://") {
        let response = reqwest::blocking::get(raw).map_err(|e| Error::Http(raw.to_string(), e))?;
        return match response.status() {
            status if status == reqwest::StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.text().map_err(|e| Error::Http(raw.to_string(), e))?;
                Ok(Some(body.trim().to_string()))
            }
            status => Err(Error::HttpStatus(raw.to_string(), status)),
        };
    }

    Ok(Some(raw.trim().to_string()))
}

/// A small hand-rolled shell-word splitter for the `after` value:
/// whitespace separates words except inside single or double quotes,
/// and `\` escapes the next character outside single quotes. Good
/// enough for `notify "deploy done"`-style commands; not a full POSIX
/// word splitter (no `$VAR`, no command substitution).
fn split_shell_words(raw: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                for c in chars.by_ref() {
                    if c == '\'' {
                        break;
                    }
                    current.push(c);
                }
            }
            '"' => {
                in_word = true;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => break,
                        '\\' if matches!(chars.peek(), Some('"') | Some('\\')) => {
                            current.push(chars.next().unwrap());
                        }
                        c => current.push(c),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }

    words
}

/// A small hand-rolled `.ini` reader: `[section]` headers, `key = value`
/// lines, `#`/`;` comments, blank lines ignored. No nesting, no quoting.
fn parse_section(contents: &str, wanted: &str) -> Option<HashMap<String, String>> {
    let mut current: Option<String> = None;
    let mut section: HashMap<String, String> = HashMap::new();
    let mut found = false;

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if found {
                break;
            }
            current = Some(name.trim().to_string());
            continue;
        }
        if current.as_deref() != Some(wanted) {
            continue;
        }
        found = true;
        if let Some((key, value)) = line.split_once('=') {
            section.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    found.then_some(section)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn loads_required_and_optional_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zkdeployment.cfg");
        fs_err::write(
            &path,
            "[zkdeployment]\nhost-id = 424242424242\nrun-directory = /var/run/zkdeploy\nrole = my.role\n",
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.host_id, "424242424242");
        assert_eq!(config.run_directory, PathBuf::from("/var/run/zkdeploy"));
        assert_eq!(config.role.as_deref(), Some("my.role"));
        assert!(config.after.is_none());
    }

    #[test]
    fn missing_required_value_is_exit_code_2() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zkdeployment.cfg");
        fs_err::write(&path, "[zkdeployment]\nrun-directory = /var/run/zkdeploy\n").unwrap();

        let err = load(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn after_is_shell_split_not_whitespace_split() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zkdeployment.cfg");
        fs_err::write(
            &path,
            "[zkdeployment]\nhost-id = h1\nrun-directory = /var/run/zkdeploy\nafter = notify \"deploy done\"\n",
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.after, Some(vec!["notify".to_string(), "deploy done".to_string()]));
    }

    #[test]
    fn file_indirection_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let value_path = dir.path().join("host-id");
        fs_err::write(&value_path, "424242424242\n").unwrap();

        let cfg_path = dir.path().join("zkdeployment.cfg");
        fs_err::write(
            &cfg_path,
            format!(
                "[zkdeployment]\nhost-id = file://{}\nrun-directory = /var/run/zkdeploy\n",
                value_path.display()
            ),
        )
        .unwrap();

        let config = load(&cfg_path).unwrap();
        assert_eq!(config.host_id, "424242424242");
    }
}
