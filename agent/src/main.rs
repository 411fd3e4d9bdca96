// SPDX-FileCopyrightText: Copyright © 2020-2026 zkdeploy Developers
//
// SPDX-License-Identifier: MPL-2.0

mod cli;

fn main() {
    std::process::exit(cli::run());
}
