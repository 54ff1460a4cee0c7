// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `pif` command group: fetch, list, apply, kill-gms.

use clap::{Args, Subcommand};

use integritykit_adb::DeviceTransport;
use integritykit_core::config::{Paths, device};
use integritykit_core::error::Result;
use integritykit_store::{HttpProfileSource, ProfileCache};

use super::connect;

/// Default endpoint serving the distilled profile list.
const DEFAULT_PROFILE_URL: &str =
    "https://integritykit.pages.dev/profiles/latest.json";

#[derive(Subcommand)]
pub enum PifCommand {
    /// Download device profiles and replace the local cache
    Fetch(FetchArgs),
    /// List cached device profiles
    List,
    /// Select a cached profile, generate pif.json, and push it
    Apply(ApplyArgs),
    /// Kill the GMS unstable process to force a profile reload
    KillGms,
}

#[derive(Args)]
pub struct FetchArgs {
    /// Fetch from a custom profile source URL
    #[arg(long, default_value = DEFAULT_PROFILE_URL)]
    url: String,
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("selector").required(true).args(["product", "random"]))]
pub struct ApplyArgs {
    /// Product ID of the profile to apply (e.g. oriole_beta)
    #[arg(long)]
    product: Option<String>,
    /// Select a random cached profile
    #[arg(short, long)]
    random: bool,
    /// Run a fetch before applying
    #[arg(long)]
    update_cache: bool,
    /// Fetch URL used with --update-cache
    #[arg(long, default_value = DEFAULT_PROFILE_URL)]
    url: String,
    /// Kill the GMS process after applying
    #[arg(long)]
    kill_gms: bool,
}

pub fn run(command: PifCommand, paths: &Paths) -> Result<()> {
    let cache = ProfileCache::new(paths);
    match command {
        PifCommand::Fetch(args) => {
            let count = cache.fetch(&HttpProfileSource::new(args.url))?;
            println!("Saved {count} device profiles to the cache.");
            Ok(())
        }
        PifCommand::List => {
            let profiles = cache.list()?;
            if profiles.is_empty() {
                println!("Profile cache is empty. Run `integritykit pif fetch` first.");
                return Ok(());
            }
            println!("{:<25} {:<25} {}", "Model", "Product ID", "Security Patch");
            println!("{}", "-".repeat(67));
            for p in profiles {
                println!("{:<25} {:<25} {}", p.model, p.product, p.security_patch);
            }
            Ok(())
        }
        PifCommand::Apply(args) => apply(&args, &cache),
        PifCommand::KillGms => {
            let transport = connect()?;
            transport.kill_process(device::DROIDGUARD_PROCESS)?;
            println!("Kill signal sent; GMS will restart automatically.");
            Ok(())
        }
    }
}

fn apply(args: &ApplyArgs, cache: &ProfileCache) -> Result<()> {
    if args.update_cache {
        let count = cache.fetch(&HttpProfileSource::new(args.url.clone()))?;
        println!("Cache updated ({count} profiles).");
    }

    let profile = match &args.product {
        Some(product) => cache.select(product)?,
        None => cache.select_random()?,
    };
    println!("Applying profile: {} ({})", profile.model, profile.product);

    let transport = connect()?;
    cache.apply(&profile, &transport, device::PIF_JSON_PATH, args.kill_gms)?;
    println!("pif.json updated on device.");
    Ok(())
}
