// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `packages` command group: info, patch, reinstall, restore.

use clap::{Args, Subcommand};

use integritykit_adb::DeviceTransport;
use integritykit_core::config::{Paths, device};
use integritykit_core::error::{IntegrityError, Result};
use integritykit_core::types::package_source_label;
use integritykit_packages::{PackageDb, PackageFilter, PackagesPatcher, PatchTarget, reinstall};

use super::connect;

#[derive(Subcommand)]
pub enum PackagesCommand {
    /// Pull and display a summary of the package database
    Info(InfoArgs),
    /// Patch package installer attribution
    Patch(PatchArgs),
    /// Clean-reinstall a package and patch its attribution
    Reinstall(ReinstallArgs),
    /// Restore the database from a local backup
    Restore(RestoreArgs),
}

#[derive(Args)]
pub struct InfoArgs {
    /// Show a high-level summary of the database
    #[arg(long, conflicts_with_all = ["list_packages", "package"])]
    summary: bool,
    /// List packages, optionally filtered
    #[arg(long)]
    list_packages: bool,
    /// Show detailed installer info for one package
    #[arg(long, value_name = "PACKAGE", conflicts_with = "list_packages")]
    package: Option<String>,
    /// Filter for --list-packages
    #[arg(long, value_parser = ["user", "system", "sideloaded", "no-installer", "all"])]
    filter: Option<String>,
}

#[derive(Args)]
pub struct PatchArgs {
    /// Patch only this package
    #[arg(long, conflicts_with = "filter")]
    package: Option<String>,
    /// Which packages to patch (default: sideloaded user apps)
    #[arg(long, value_parser = ["user", "system", "sideloaded", "no-installer", "all"])]
    filter: Option<String>,
    /// Installer to attribute installs to; "" or 0 strips attribution
    #[arg(long, default_value = device::PLAY_STORE_PACKAGE)]
    origin: String,
    /// packageSource value to record (0 = unspecified, 2 = store)
    #[arg(long, default_value = "0")]
    source: String,
    /// Soft-reboot afterwards so the change takes effect
    #[arg(long)]
    apply_changes: bool,
    /// With --apply-changes, do a full reboot instead
    #[arg(long, requires = "apply_changes")]
    full_reboot: bool,
}

#[derive(Args)]
pub struct ReinstallArgs {
    /// Package to reinstall
    package_name: String,
    /// Installer to attribute the fresh install to
    #[arg(long, default_value = device::PLAY_STORE_PACKAGE)]
    origin: String,
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("action").required(true).args(["list", "sequence"]))]
pub struct RestoreArgs {
    /// List available backups
    #[arg(long)]
    list: bool,
    /// Sequence number of the backup to restore
    sequence: Option<u64>,
    /// Soft-reboot afterwards so the restored file takes effect
    #[arg(long)]
    apply_changes: bool,
}

pub fn run(command: PackagesCommand, paths: &Paths) -> Result<()> {
    match command {
        PackagesCommand::Info(args) => info(&args, paths),
        PackagesCommand::Patch(args) => patch(&args, paths),
        PackagesCommand::Reinstall(args) => {
            let transport = connect()?;
            reinstall::reinstall(&transport, paths, &args.package_name, &args.origin)?;
            println!(
                "Reinstalled '{}' with installer '{}'. A soft reboot is required.",
                args.package_name, args.origin
            );
            Ok(())
        }
        PackagesCommand::Restore(args) => restore(&args, paths),
    }
}

fn parse_filter(filter: Option<&str>, package: Option<&str>) -> PackageFilter {
    if let Some(package) = package {
        return PackageFilter::Single(package.to_owned());
    }
    match filter {
        Some("user") => PackageFilter::User,
        Some("system") => PackageFilter::System,
        Some("no-installer") => PackageFilter::NoInstaller,
        Some("all") => PackageFilter::All,
        Some("sideloaded") | None => PackageFilter::Sideloaded,
        Some(other) => unreachable!("clap validated filter {other}"),
    }
}

fn info(args: &InfoArgs, paths: &Paths) -> Result<()> {
    let transport = connect()?;
    let patcher = PackagesPatcher::new(&transport, paths)?;
    let (db, _) = patcher.read_database()?;

    if args.summary {
        print_summary(&db);
    } else if args.list_packages {
        print_list(&db, parse_filter(args.filter.as_deref(), None));
    } else if let Some(package) = &args.package {
        print_details(&db, package)?;
    } else {
        print_summary(&db);
    }
    Ok(())
}

fn print_summary(db: &PackageDb) {
    let summary = db.summarize();
    println!("--- Package Database Summary ---");
    if let Some(sdk) = &summary.sdk_version {
        println!(" SDK Version: {sdk}");
    }
    if let Some(fp) = &summary.fingerprint {
        println!(" Fingerprint: {fp}");
    }
    println!(" Total Packages: {}", summary.total);
    println!("\n Installers:");
    for (installer, count) in &summary.installer_counts {
        println!("  - {installer}: {count} packages");
    }
}

fn print_list(db: &PackageDb, filter: PackageFilter) {
    println!("{:<50} {:<30} {}", "Package Name", "Installer", "Source");
    println!("{}", "-".repeat(100));
    for index in db.classify(&filter) {
        let record = &db.records()[index];
        println!(
            "{:<50} {:<30} {}",
            record.name(),
            record.installer().unwrap_or("None"),
            record
                .package_source()
                .map(package_source_label)
                .unwrap_or_else(|| "N/A".into())
        );
    }
}

fn print_details(db: &PackageDb, package: &str) -> Result<()> {
    let record = db
        .find(package)
        .ok_or_else(|| IntegrityError::NotFound(format!("package '{package}' in the database")))?;

    println!("--- Details for {package} ---");
    println!(" {:<25} {}", "Install Path:", record.code_path());
    println!(" {:<25} {}", "User ID:", record.user_id().unwrap_or("Not Set"));
    println!(" {:<25} {}", "System App:", record.is_system_app());
    for key in [
        "installer",
        "installInitiator",
        "installerUid",
        "packageSource",
        "installOriginator",
        "isOrphaned",
    ] {
        println!("  - {:<23} {}", format!("{key}:"), record.attr(key).unwrap_or("Not Set"));
    }
    Ok(())
}

fn patch(args: &PatchArgs, paths: &Paths) -> Result<()> {
    let transport = connect()?;
    let patcher = PackagesPatcher::new(&transport, paths)?;
    let (mut db, raw) = patcher.read_database()?;

    let filter = parse_filter(args.filter.as_deref(), args.package.as_deref());
    let target = if args.origin.is_empty() || args.origin == "0" {
        PatchTarget::RemoveOrigin
    } else {
        PatchTarget::Installer {
            package: args.origin.clone(),
            package_source: args.source.clone(),
        }
    };

    let changed = db.patch(&filter, &target)?;
    if changed == 0 {
        println!("No packages required modification.");
        return Ok(());
    }

    let entry = patcher.write_database(&db, &raw)?;
    println!(
        "Patched {changed} package(s); pre-patch database saved as backup #{}.",
        entry.sequence
    );

    apply_changes(&transport, args.apply_changes, args.full_reboot)
}

fn restore(args: &RestoreArgs, paths: &Paths) -> Result<()> {
    let transport = connect()?;
    let patcher = PackagesPatcher::new(&transport, paths)?;

    if args.list {
        let backups = patcher.list_backups()?;
        if backups.is_empty() {
            println!("No backups found.");
            return Ok(());
        }
        println!("{:<6} {:<25} {:<10} {}", "Seq", "Created (UTC)", "Size", "Fingerprint");
        println!("{}", "-".repeat(70));
        for entry in backups {
            println!(
                "{:<6} {:<25} {:<10} {}",
                entry.sequence,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.size,
                entry.fingerprint().unwrap_or_else(|_| "?".into())
            );
        }
        return Ok(());
    }

    let Some(sequence) = args.sequence else {
        unreachable!("clap enforces either --list or a sequence number");
    };
    patcher.restore(sequence)?;
    println!("Restored database from backup #{sequence}.");

    apply_changes(&transport, args.apply_changes, false)
}

fn apply_changes(transport: &dyn DeviceTransport, apply: bool, full: bool) -> Result<()> {
    if !apply {
        println!("A reboot (or `integritykit system soft-reboot`) is required for the change to take effect.");
        return Ok(());
    }
    if full {
        println!("Rebooting device...");
        transport.full_reboot()
    } else {
        println!("Soft-rebooting device (the UI will restart)...");
        transport.soft_reboot()
    }
}
