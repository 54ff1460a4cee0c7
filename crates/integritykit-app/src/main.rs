// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IntegrityKit: ADB control-plane for device attestation artifacts.
//
// Entry point. Initialises logging, resolves the local state directory,
// and dispatches to the command handlers. Any unrecovered error exits
// non-zero with a machine-readable kind tag on the last line.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use integritykit_core::Paths;
use integritykit_core::error::Result;

use commands::{packages, pif, system, tee};

/// Manage device-side attestation artifacts over ADB: installer
/// attribution, keybox credentials, identity profiles, and TEE-module
/// configuration.
#[derive(Parser)]
#[command(name = "integritykit", version)]
struct Cli {
    /// Enable verbose debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Override the local state directory
    #[arg(long, global = true, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and patch the installer-attribution database
    #[command(subcommand)]
    Packages(packages::PackagesCommand),
    /// Manage device-identity profiles (pif.json)
    #[command(subcommand)]
    Pif(pif::PifCommand),
    /// Manage TEE-module configuration (keyboxes, target rules, patch levels)
    #[command(subcommand)]
    Tee(tee::TeeCommand),
    /// System-level device actions
    #[command(subcommand)]
    System(system::SystemCommand),
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.debug { "debug" } else { "info" })
            }),
        )
        .with_target(false)
        .init();

    let paths = cli
        .state_dir
        .map(Paths::at)
        .unwrap_or_else(Paths::resolve);
    tracing::debug!(state_dir = %paths.root().display(), "state directory resolved");

    if let Err(e) = run(cli.command, &paths) {
        eprintln!("error[{}]: {e}", e.kind());
        std::process::exit(1);
    }
}

fn run(command: Commands, paths: &Paths) -> Result<()> {
    match command {
        Commands::Packages(cmd) => packages::run(cmd, paths),
        Commands::Pif(cmd) => pif::run(cmd, paths),
        Commands::Tee(cmd) => tee::run(cmd, paths),
        Commands::System(cmd) => system::run(cmd),
    }
}
