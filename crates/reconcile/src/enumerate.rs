// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Walks the coordination tree to find every deployment targeting this
//! host, by host-identifier, host FQDN, or configured role.

use std::collections::HashSet;

use zk::{Coordinator, Value};

use crate::{Deployment, Error, Version};

pub async fn enumerate_deployments(
    coord: &dyn Coordinator,
    host_id: &str,
    host_fqdn: &str,
    role: Option<&str>,
) -> Result<Vec<Deployment>, Error> {
    let paths = coord.walk("/").await?;
    let mut seen = HashSet::new();
    let mut out = vec![];

    let host_suffix = format!("/deploy/{host_id}");
    let fqdn_suffix = format!("/deploy/{host_fqdn}");
    let role_suffix = role.map(|r| format!("/deploy/{r}"));

    for path in paths {
        let targets_host = path.ends_with(&host_suffix) || path.ends_with(&fqdn_suffix);
        let targets_role = role_suffix.as_ref().is_some_and(|s| path.ends_with(s.as_str()));

        if let Some(role) = role {
            if targets_host {
                return Err(Error::Conflict(format!(
                    "found a host-targeted deployment at {path} but this host has role {role:?}"
                )));
            }
            if !targets_role {
                continue;
            }
        } else if !targets_host {
            continue;
        }

        let Some(deploy_idx) = path.find("/deploy/") else {
            continue;
        };
        let app_path = path[..deploy_idx].to_string();

        if !seen.insert(app_path.clone()) {
            return Err(Error::Conflict(format!(
                "conflicting deployments for {app_path}: targeted by more than one selector"
            )));
        }

        let deploy_props = coord.get_properties(&path).await?;
        let n = match deploy_props.get("n") {
            Some(Value::Int(i)) if *i > 0 => *i as u32,
            Some(other) => {
                return Err(Error::Conflict(format!("{path}: invalid n {other:?}")));
            }
            None => 1,
        };

        let app_props = coord.get_properties(&app_path).await?;
        let type_value = app_props
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Conflict(format!("{app_path}: missing type property")))?;

        let (app_token, subtype) = match type_value.split_whitespace().collect::<Vec<_>>().as_slice() {
            [app] => (app.to_string(), None),
            [app, subtype] => (app.to_string(), Some(subtype.to_string())),
            _ => return Err(Error::Conflict(format!("{app_path}: invalid type {type_value:?}"))),
        };

        let rpm_name = app_token.clone();
        let (app, version) = if let Some(v) = app_props.get("version").and_then(Value::as_str) {
            (app_token, Version::parse(v))
        } else if let Some((base, _version_suffix)) = app_token.rsplit_once('-') {
            (base.to_string(), Version::AnyInstalled)
        } else {
            return Err(Error::Conflict(format!("no version found for {app_path}")));
        };

        for n_index in 0..n {
            out.push(Deployment {
                app: app.clone(),
                subtype: subtype.clone(),
                version: version.clone(),
                rpm_name: rpm_name.clone(),
                path: app_path.clone(),
                n: n_index,
            });
        }
    }

    Ok(out)
}
