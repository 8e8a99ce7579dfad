// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! CLI surface, the same shape as the teacher's `daemon::args::Args` /
//! `web-host::main::Args`: a handful of `#[arg(long, ...)]` fields with
//! sensible defaults, no subcommands.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "mudcore-gateway", about = "Real-time MUD connection and message-routing core")]
pub struct Args {
    #[arg(
        long,
        value_name = "listen-address",
        help = "WebSocket listen address",
        default_value = "0.0.0.0:8787"
    )]
    pub listen_address: String,

    #[arg(
        long,
        value_name = "config-path",
        help = "Path to an optional YAML config file layered over the built-in defaults"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "broker-url",
        help = "Overrides broker.url from config/defaults"
    )]
    pub broker_url: Option<String>,

    #[arg(long, help = "Resolve configuration, print it as JSON, and exit without starting the server")]
    pub print_config: bool,

    #[arg(long, help = "Use DEBUG-level logging when RUST_LOG is unset")]
    pub debug: bool,
}
