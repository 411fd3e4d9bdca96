// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Flat-path helpers: coordination paths <-> filesystem/lock-safe names.

/// `path[1:]` with `/` replaced by `,`, used to derive safe filesystem and
/// lock-node names from a coordination path.
pub fn flatten(path: &str) -> String {
    path.trim_start_matches('/').replace('/', ",")
}

/// Inverse of [`flatten`].
pub fn unflatten(name: &str) -> String {
    format!("/{}", name.replace(',', "/"))
}

pub fn parent_of(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        Some("/")
    } else {
        Some(&trimmed[..idx])
    }
}

pub fn join(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flatten_strips_leading_slash_and_joins() {
        assert_eq!(flatten("/cust/app"), "cust,app");
        assert_eq!(unflatten("cust,app"), "/cust/app");
    }

    #[test]
    fn parent_of_root_child() {
        assert_eq!(parent_of("/hosts"), Some("/"));
        assert_eq!(parent_of("/cust/app"), Some("/cust"));
        assert_eq!(parent_of("/"), None);
    }
}
