// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Parses and applies one `.zk`/`.zkx` tree description: an indented
//! text format where a line starting with `/` introduces a node
//! (nested under whichever `/`-line precedes it at a shallower
//! indent) and a `key = value` line sets one of its properties.
//!
//! ```text
//! /hosts
//!   version = "initial"
//!   /host1
//!     role = "controller"
//! ```
//!
//! This format is this workspace's own invention: the original driver
//! delegated to `zc.zk.ZK.import_tree`, whose exact grammar lives
//! outside this family of tools.

use std::collections::{BTreeMap, HashSet};

use zk::{Coordinator, CreateOptions, Error, Value};

/// One node mentioned by a description, with the properties it sets.
/// Properties not mentioned on an already-existing node are left
/// untouched (this is a merge, not a replace).
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: String,
    pub props: BTreeMap<String, Value>,
}

pub fn parse(text: &str) -> Vec<Entry> {
    let mut entries: Vec<Entry> = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new(); // (indent, index into entries)

    for raw_line in text.lines() {
        if raw_line.trim().is_empty() {
            continue;
        }
        let indent = raw_line.len() - raw_line.trim_start().len();
        let line = raw_line.trim();

        while matches!(stack.last(), Some(&(i, _)) if i >= indent) {
            stack.pop();
        }

        if let Some(name) = line.strip_prefix('/') {
            let parent = stack.last().map(|&(_, idx)| entries[idx].path.as_str());
            let path = match parent {
                Some(parent) => zk::path::join(parent, name),
                None => format!("/{name}"),
            };
            entries.push(Entry {
                path,
                props: BTreeMap::new(),
            });
            stack.push((indent, entries.len() - 1));
        } else if let Some((key, value)) = line.split_once('=') {
            if let Some(&(_, idx)) = stack.last() {
                entries[idx].props.insert(key.trim().to_string(), parse_value(value.trim()));
            }
        }
    }

    entries
}

fn parse_value(raw: &str) -> Value {
    if raw == "null" {
        Value::Null
    } else if raw == "true" {
        Value::Bool(true)
    } else if raw == "false" {
        Value::Bool(false)
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Int(i)
    } else if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        Value::Str(raw[1..raw.len() - 1].to_string())
    } else {
        Value::Str(raw.to_string())
    }
}

/// Applies `entries` to the tree: creates/merges every mentioned node,
/// then, if `trim`, deletes any descendant of a top-level mentioned
/// path that the description no longer mentions.
pub async fn apply(coord: &dyn Coordinator, entries: &[Entry], trim: bool) -> Result<(), Error> {
    for entry in entries {
        if !coord.exists(&entry.path).await? {
            coord.create(&entry.path, "", CreateOptions::default()).await?;
        }
        let mut props = coord.get_properties(&entry.path).await?;
        for (k, v) in &entry.props {
            props.insert(k.clone(), v.clone());
        }
        coord.set_properties(&entry.path, props).await?;
    }

    if trim {
        let mentioned: HashSet<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        for root in top_level_paths(entries, &mentioned) {
            let mut existing = coord.walk(root).await?;
            existing.reverse(); // children before parents
            for path in existing {
                if path != root && !mentioned.contains(path.as_str()) {
                    coord.delete(&path).await?;
                }
            }
        }
    }

    Ok(())
}

fn top_level_paths<'a>(entries: &'a [Entry], mentioned: &HashSet<&str>) -> Vec<&'a str> {
    entries
        .iter()
        .filter(|e| !zk::path::parent_of(&e.path).is_some_and(|p| mentioned.contains(p)))
        .map(|e| e.path.as_str())
        .collect()
}
