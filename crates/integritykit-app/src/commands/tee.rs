// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `tee` command group: sync, keybox, target, patch.

use std::path::PathBuf;

use clap::{Args, Subcommand};

use integritykit_adb::DeviceTransport;
use integritykit_core::config::{Paths, device};
use integritykit_core::error::{IntegrityError, Result};
use integritykit_keybox::{CrlValidator, KeyboxManager, KeyboxSelection, parse_keybox};
use integritykit_tee::target::TargetMode;
use integritykit_tee::{modify_remote_text_file, patch_level, pull_configs, push_configs, target};

use super::connect;

#[derive(Subcommand)]
pub enum TeeCommand {
    /// Sync config files between the device and the local machine
    Sync(SyncArgs),
    /// Manage keybox credentials
    Keybox(KeyboxArgs),
    /// Manage the target-rules file
    Target(TargetArgs),
    /// Manage the patch-level override file
    Patch(PatchArgs),
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("direction").required(true).args(["pull", "push"]))]
pub struct SyncArgs {
    /// Pull config files from the device into the local sync directory
    #[arg(long)]
    pull: bool,
    /// Push local config copies back to the device
    #[arg(long)]
    push: bool,
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("action").required(true).args(
    ["list", "list_local", "show", "verify", "import", "push", "push_aosp"]
))]
pub struct KeyboxArgs {
    /// List keybox files on the device
    #[arg(long)]
    list: bool,
    /// List keyboxes in the local cache
    #[arg(long)]
    list_local: bool,
    /// Show parsed details of a keybox on the device
    #[arg(long, value_name = "FILENAME")]
    show: Option<String>,
    /// Verify local keybox file(s) against the revocation list
    #[arg(long, value_name = "PATH")]
    verify: Option<PathBuf>,
    /// Verify and import valid keyboxes into the local cache
    #[arg(long, value_name = "PATH")]
    import: Option<PathBuf>,
    /// Push a cached keybox (by serial) to the device
    #[arg(long, value_name = "SERIAL")]
    push: Option<String>,
    /// Push the built-in AOSP software keybox to the device
    #[arg(long)]
    push_aosp: bool,
    /// Remote filename for --push / --push-aosp
    #[arg(long = "as", value_name = "NAME", default_value = "keybox.xml")]
    as_name: String,
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("action").required(true).args(["show", "add", "remove"]))]
pub struct TargetArgs {
    /// Show and interpret the current target rules
    #[arg(long)]
    show: bool,
    /// Add or update a package rule
    #[arg(long, value_name = "PACKAGE")]
    add: Option<String>,
    /// Remove a package rule
    #[arg(long, value_name = "PACKAGE")]
    remove: Option<String>,
    /// Certificate mode for --add
    #[arg(long, value_parser = ["auto", "generate", "patch"], default_value = "auto")]
    mode: String,
    /// Keybox section to place the rule under (e.g. spare_keybox.xml)
    #[arg(long)]
    keybox: Option<String>,
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("action").required(true).args(
    ["show", "set_global", "set_package", "remove"]
))]
pub struct PatchArgs {
    /// Show the current patch-level overrides
    #[arg(long)]
    show: bool,
    /// Set a key in the global scope
    #[arg(long)]
    set_global: bool,
    /// Set a key in a package's scope
    #[arg(long, value_name = "PACKAGE")]
    set_package: Option<String>,
    /// Remove a package's entire override section
    #[arg(long, value_name = "PACKAGE")]
    remove: Option<String>,
    /// Key to set
    #[arg(long, value_parser = patch_level::PATCH_KEYS)]
    key: Option<String>,
    /// Value to set (e.g. 2025-11-05, no)
    #[arg(long)]
    value: Option<String>,
}

pub fn run(command: TeeCommand, paths: &Paths) -> Result<()> {
    match command {
        TeeCommand::Sync(args) => sync(&args, paths),
        TeeCommand::Keybox(args) => keybox(&args, paths),
        TeeCommand::Target(args) => target_cmd(&args),
        TeeCommand::Patch(args) => patch_cmd(&args),
    }
}

fn sync(args: &SyncArgs, paths: &Paths) -> Result<()> {
    let transport = connect()?;
    println!("Local sync directory: {}", paths.device_configs_dir().display());
    if args.pull {
        let pulled = pull_configs(&transport, paths)?;
        println!("Pulled {} file(s). Edit them locally, then `tee sync --push`.", pulled.len());
    } else if args.push {
        let pushed = push_configs(&transport, paths)?;
        println!("Pushed {} file(s).", pushed.len());
    }
    Ok(())
}

fn keybox(args: &KeyboxArgs, paths: &Paths) -> Result<()> {
    let manager = KeyboxManager::new(paths);

    if args.list {
        let transport = connect()?;
        let names = manager.list_remote(&transport)?;
        if names.is_empty() {
            println!("No keybox (.xml) files in {} on the device.", device::TEE_BASE_DIR);
        } else {
            println!("--- Keyboxes on Device ({}) ---", device::TEE_BASE_DIR);
            for name in names {
                println!("- {name}");
            }
        }
        return Ok(());
    }

    if args.list_local {
        let records = manager.list_local()?;
        if records.is_empty() {
            println!("No keyboxes in the local cache. Use `tee keybox --import` to add some.");
            return Ok(());
        }
        println!("--- Keyboxes in Local Cache ---");
        for record in records {
            let device_id = record.metadata.get("device_id").map_or("?", String::as_str);
            let source = record.metadata.get("source_file").map_or("?", String::as_str);
            println!("- {}  (device id: {device_id}, imported from: {source})", record.key);
        }
        return Ok(());
    }

    if let Some(name) = &args.show {
        let transport = connect()?;
        let content = manager.show_remote(&transport, name)?;
        print_keybox_details(name, &content);
        return Ok(());
    }

    if let Some(path) = &args.verify {
        let validator = CrlValidator::fetch(device::CRL_URL)?;
        let outcome = manager.import_dry_run(path, &validator)?;
        print_verification(&outcome.0, &outcome.1);
        return Ok(());
    }

    if let Some(path) = &args.import {
        let validator = CrlValidator::fetch(device::CRL_URL)?;
        let outcome = manager.import(path, &validator)?;
        println!(
            "Imported: {}  Rejected: {}",
            outcome.imported_count(),
            outcome.rejected_count()
        );
        for serial in &outcome.imported {
            println!("  [OK] {serial}");
        }
        for (file, reason) in &outcome.rejected {
            println!("  [REJECTED] {file}: {reason}");
        }
        return Ok(());
    }

    let selection = if args.push_aosp {
        KeyboxSelection::BuiltinAosp
    } else if let Some(serial) = &args.push {
        KeyboxSelection::Cached(serial.clone())
    } else {
        unreachable!("clap enforces one keybox action");
    };

    let transport = connect()?;
    manager.push(&transport, &selection, &args.as_name)?;
    println!("Pushed keybox to device as '{}'.", args.as_name);
    Ok(())
}

fn print_keybox_details(name: &str, content: &str) {
    println!("--- Details for {name} ---");
    match parse_keybox(content) {
        Ok(parsed) => {
            if let Some(id) = &parsed.device_id {
                println!("  Device ID: {id}");
            }
            for key in &parsed.keys {
                println!(
                    "  {}: serial {}  ({} cert(s) in chain)",
                    key.algorithm.to_uppercase(),
                    key.leaf_serial,
                    key.chain_len
                );
            }
        }
        Err(reason) => println!("  Not a parsable keybox: {reason}"),
    }
}

fn print_verification(valid: &[(String, Vec<String>)], rejected: &[(String, String)]) {
    for (file, serials) in valid {
        println!("[VALID] {file}");
        for serial in serials {
            println!("  - {serial}");
        }
    }
    for (file, reason) in rejected {
        println!("[REJECTED] {file}: {reason}");
    }
    println!("\nValid: {}  Rejected: {}", valid.len(), rejected.len());
}

fn target_cmd(args: &TargetArgs) -> Result<()> {
    let transport = connect()?;

    if args.show {
        match transport.pull_as_root(device::TARGET_FILE) {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes);
                let entries = target::interpret(&content);
                if entries.is_empty() {
                    println!("target.txt has no rules.");
                    return Ok(());
                }
                println!("--- Interpreted target.txt ---");
                for entry in entries {
                    println!(
                        "- {}  mode: {:?}  keybox: {}",
                        entry.package,
                        entry.mode,
                        entry.keybox.as_deref().unwrap_or("keybox.xml (default)")
                    );
                }
            }
            Err(IntegrityError::NotFound(_)) => {
                println!("target.txt does not exist on the device.");
            }
            Err(other) => return Err(other),
        }
        return Ok(());
    }

    if let Some(package) = &args.add {
        // A rule pointing at a keybox the device does not have would
        // break attestation for that package; check before editing.
        if let Some(keybox) = &args.keybox {
            let exists = transport
                .run_shell(&format!(
                    "su -c '[ -f {}/{keybox} ]'",
                    device::TEE_BASE_DIR
                ))?
                .ok();
            if !exists {
                return Err(IntegrityError::NotFound(format!(
                    "keybox '{keybox}' on the device"
                )));
            }
        }

        let mode = match args.mode.as_str() {
            "generate" => TargetMode::Generate,
            "patch" => TargetMode::Patch,
            _ => TargetMode::Auto,
        };
        modify_remote_text_file(&transport, device::TARGET_FILE, |content| {
            target::add_rule(content, package, mode, args.keybox.as_deref())
        })?;
        println!("Added/updated rule for '{package}'.");
        return Ok(());
    }

    if let Some(package) = &args.remove {
        let changed = modify_remote_text_file(&transport, device::TARGET_FILE, |content| {
            target::remove_rule(content, package)
        })?;
        if changed {
            println!("Removed rule for '{package}'.");
        } else {
            println!("No rule for '{package}'; nothing to do.");
        }
        return Ok(());
    }
    Ok(())
}

fn patch_cmd(args: &PatchArgs) -> Result<()> {
    let transport = connect()?;

    if args.show {
        match transport.pull_as_root(device::PATCH_FILE) {
            Ok(bytes) => {
                println!("--- security_patch.txt ---");
                print!("{}", String::from_utf8_lossy(&bytes));
            }
            Err(IntegrityError::NotFound(_)) => {
                println!("security_patch.txt does not exist on the device.");
            }
            Err(other) => return Err(other),
        }
        return Ok(());
    }

    if let Some(package) = &args.remove {
        let changed = modify_remote_text_file(&transport, device::PATCH_FILE, |content| {
            patch_level::remove_section(content, package)
        })?;
        if changed {
            println!("Removed override section for '{package}'.");
        } else {
            println!("No override section for '{package}'; nothing to do.");
        }
        return Ok(());
    }

    // --set-global / --set-package both need --key and --value.
    let (key, value) = match (&args.key, &args.value) {
        (Some(key), Some(value)) => (key.clone(), value.clone()),
        _ => {
            return Err(IntegrityError::ValidationFailed {
                item: "tee patch".into(),
                reason: "--key and --value are required to set a patch level".into(),
            });
        }
    };
    let scope = match (&args.set_package, args.set_global) {
        (Some(package), _) => Some(package.as_str()),
        (None, true) => None,
        _ => unreachable!("clap enforces one patch action"),
    };

    modify_remote_text_file(&transport, device::PATCH_FILE, |content| {
        patch_level::set_value(content, scope, &key, &value)
    })?;
    match scope {
        Some(package) => println!("Set {key}={value} for '{package}'."),
        None => println!("Set global {key}={value}."),
    }
    Ok(())
}
