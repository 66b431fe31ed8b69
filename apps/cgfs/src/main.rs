// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Entry point for the cgfs filesystem daemon.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Command line front end for the permission-filtered cgroup filesystem.
//!
//! Startup discovers the controller set from the cgroup manager, moves the
//! daemon itself to the root cgroup so its own placement never filters what
//! callers may see, and then hands the mount loop to FUSE.

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use cgm_client::{CgroupManager, ManagerHandle, DEFAULT_MANAGER_SOCKET};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};

use cgfs::fs::{self, CgroupFs};
use cgfs::state::ControllerSet;

/// Environment variable overriding the manager socket path.
const MANAGER_SOCKET_ENV: &str = "CGFS_MANAGER_SOCKET";

#[derive(Debug, Parser)]
#[command(
    author = "Lukas Bower",
    version,
    about = "Permission-filtered cgroup filesystem",
    disable_help_flag = true
)]
struct Cli {
    /// Comma-separated mount options forwarded to the FUSE layer.
    #[arg(short = 'o', value_name = "OPTIONS")]
    options: Vec<String>,

    /// Directory where the filesystem is mounted.
    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: PathBuf,
}

fn is_help_token(arg: &str) -> bool {
    matches!(arg, "-h" | "--help" | "-help" | "help")
}

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!();
    eprintln!("  cgfs [-o OPTIONS]... MOUNTPOINT");
    eprintln!();
    eprintln!("Serves the cgroup hierarchy reported by the cgroup manager at");
    eprintln!("MOUNTPOINT, filtered by each calling process's credentials.");
    eprintln!("Mount options are forwarded to the FUSE layer.");
    process::exit(1);
}

fn init_logging() {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn manager_socket() -> PathBuf {
    env::var_os(MANAGER_SOCKET_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MANAGER_SOCKET))
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|arg| is_help_token(arg)) {
        usage();
    }
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{err}");
            usage();
        }
    };
    init_logging();

    let socket = manager_socket();
    let handle = ManagerHandle::new(&socket);

    let discovered = handle
        .list_controllers()
        .with_context(|| format!("discover controllers via {}", socket.display()))?;
    let controllers = ControllerSet::from_discovered(discovered);
    if controllers.is_empty() {
        bail!("cgroup manager reported no controllers");
    }

    if let Err(err) = handle.escape_to_root_cgroup() {
        warn!("[cgfs] could not escape to the root cgroup: {err}");
    }

    info!(
        "[cgfs] serving {} controllers at {}",
        controllers.len(),
        cli.mountpoint.display()
    );

    let filesystem = CgroupFs::new(handle, controllers);
    fs::mount(filesystem, &cli.mountpoint, &cli.options)?;
    Ok(())
}
