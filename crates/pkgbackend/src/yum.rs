// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `yum`-backed [`PackageManager`], grounded on the original's
//! `yum -q list installed`, `yum -y install`, `yum -y clean all` and
//! `yum -y remove` invocations.

use crate::{run, run_output, Error, PackageManager};

#[derive(Debug, Default)]
pub struct Yum;

impl Yum {
    pub fn new() -> Self {
        Self
    }
}

impl PackageManager for Yum {
    fn rpm_version(&self, rpm_name: &str) -> Result<Option<String>, Error> {
        let Some(output) = run_output("yum", &["-q", "list", "installed", rpm_name])? else {
            return Ok(None);
        };
        for line in output.lines() {
            if let Some(rest) = line.strip_prefix(rpm_name) {
                if !rest.starts_with(['.', ' ']) {
                    continue;
                }
                if let Some(field) = line.split_whitespace().nth(1) {
                    let version = field.split('-').next().unwrap_or(field);
                    return Ok(Some(version.to_string()));
                }
            }
        }
        Ok(None)
    }

    fn install(&self, rpm_name: &str, version: Option<&str>, cleaned: &mut bool) -> Result<(), Error> {
        let rpm_spec = match version {
            Some(v) => format!("{rpm_name}-{v}"),
            None => rpm_name.to_string(),
        };

        if !*cleaned {
            run("yum", &["-y", "clean", "all"])?;
            *cleaned = true;
        }

        run("yum", &["-y", "install", &rpm_spec])?;

        let Some(wanted) = version else {
            return Ok(());
        };

        let got = self.rpm_version(rpm_name)?;
        if got.as_deref() == Some(wanted) {
            return Ok(());
        }

        run("yum", &["-y", "downgrade", &rpm_spec])?;
        let got = self.rpm_version(rpm_name)?;
        if got.as_deref() != Some(wanted) {
            return Err(Error::InstallFailed {
                rpm_name: rpm_name.to_string(),
                wanted: wanted.to_string(),
                got,
            });
        }

        Ok(())
    }

    fn remove(&self, rpm_name: &str) -> Result<(), Error> {
        run("yum", &["-y", "remove", rpm_name])
    }
}
