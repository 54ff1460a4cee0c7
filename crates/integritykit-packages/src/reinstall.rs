// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Clean reinstall: pull a package's APK splits off the device, uninstall,
// reinstall through a `pm` session, then retarget its installer
// attribution. The final attribution write goes through the patcher and
// therefore takes its own backup.

use integritykit_adb::DeviceTransport;
use integritykit_core::config::{Paths, device};
use integritykit_core::error::{IntegrityError, Result};
use tracing::{info, instrument};

use crate::database::{PackageFilter, PatchTarget};
use crate::patcher::PackagesPatcher;

/// Reinstall `package` in place and attribute the install to `origin`.
#[instrument(skip(transport, paths))]
pub fn reinstall(
    transport: &dyn DeviceTransport,
    paths: &Paths,
    package: &str,
    origin: &str,
) -> Result<()> {
    let apk_paths = apk_paths(transport, package)?;
    info!(package, splits = apk_paths.len(), "pulling APK splits");

    let mut apks: Vec<(String, Vec<u8>)> = Vec::new();
    for path in &apk_paths {
        let name = path.rsplit('/').next().unwrap_or("base.apk").to_owned();
        apks.push((name, transport.pull(path)?));
    }

    info!(package, "uninstalling");
    let out = transport.run_shell(&format!("pm uninstall {package}"))?;
    if !out.ok() {
        return Err(IntegrityError::Transport(format!(
            "pm uninstall {package} failed: {}",
            out.stdout.trim()
        )));
    }

    install(transport, &apks)?;
    info!(package, "reinstalled from pulled splits");

    // Retarget the fresh install's attribution. write_database takes the
    // mandatory backup itself.
    let patcher = PackagesPatcher::new(transport, paths)?;
    let (mut db, raw) = patcher.read_database()?;
    let changed = db.patch(
        &PackageFilter::Single(package.to_owned()),
        &PatchTarget::Installer {
            package: origin.to_owned(),
            package_source: "0".to_owned(),
        },
    )?;
    if changed > 0 {
        patcher.write_database(&db, &raw)?;
        info!(package, origin, "installer attribution retargeted");
    } else {
        info!(package, "attribution already correct, no write needed");
    }
    Ok(())
}

fn apk_paths(transport: &dyn DeviceTransport, package: &str) -> Result<Vec<String>> {
    let out = transport.run_shell(&format!("pm path {package}"))?;
    let paths: Vec<String> = out
        .stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .map(str::to_owned)
        .collect();
    if paths.is_empty() {
        return Err(IntegrityError::NotFound(format!(
            "package '{package}' on the device"
        )));
    }
    Ok(paths)
}

/// Install pulled APKs: plain `pm install` for a single APK, an install
/// session for split APKs.
fn install(transport: &dyn DeviceTransport, apks: &[(String, Vec<u8>)]) -> Result<()> {
    let staged: Vec<String> = apks
        .iter()
        .map(|(name, _)| format!("{}/{name}", device::STAGING_DIR))
        .collect();
    for ((_, bytes), staged_path) in apks.iter().zip(&staged) {
        transport.push(bytes, staged_path)?;
    }

    let result = if apks.len() == 1 {
        run_pm(transport, &format!("pm install -r {}", staged[0]))
    } else {
        install_session(transport, &staged)
    };

    // Staged APKs are no longer needed regardless of outcome.
    let _ = transport.run_shell(&format!("rm -f {}", staged.join(" ")));
    result
}

fn install_session(transport: &dyn DeviceTransport, staged: &[String]) -> Result<()> {
    let out = run_pm_output(transport, "pm install-create")?;
    let session = out
        .split('[')
        .nth(1)
        .and_then(|s| s.split(']').next())
        .ok_or_else(|| {
            IntegrityError::Transport(format!("unexpected install-create output: {out}"))
        })?
        .to_owned();

    for (index, path) in staged.iter().enumerate() {
        run_pm(
            transport,
            &format!("pm install-write {session} split{index} {path}"),
        )?;
    }
    run_pm(transport, &format!("pm install-commit {session}"))
}

fn run_pm(transport: &dyn DeviceTransport, command: &str) -> Result<()> {
    run_pm_output(transport, command).map(|_| ())
}

fn run_pm_output(transport: &dyn DeviceTransport, command: &str) -> Result<String> {
    let out = transport.run_shell(command)?;
    if !out.ok() || out.stdout.contains("Failure") {
        return Err(IntegrityError::Transport(format!(
            "{command} failed: {}",
            out.stdout.trim()
        )));
    }
    Ok(out.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::fixtures::MIXED_DB;
    use integritykit_adb::StubTransport;

    fn transport_with_db() -> StubTransport {
        let t = StubTransport::new();
        t.set_file(device::PACKAGES_XML, MIXED_DB.as_bytes());
        t
    }

    #[test]
    fn single_apk_reinstall_patches_attribution() {
        let tmp = tempfile::tempdir().unwrap();
        let t = transport_with_db();
        t.set_file("/data/app/~~ghi==/com.example.sideload-S3/base.apk", b"apk-bytes");
        t.script(
            "pm path com.example.sideload",
            "package:/data/app/~~ghi==/com.example.sideload-S3/base.apk",
            0,
        );
        t.script("pm uninstall com.example.sideload", "Success", 0);
        t.script("pm install -r /data/local/tmp/base.apk", "Success", 0);

        reinstall(
            &t,
            &Paths::at(tmp.path()),
            "com.example.sideload",
            device::PLAY_STORE_PACKAGE,
        )
        .unwrap();

        let db = String::from_utf8(t.file_contents(device::PACKAGES_XML).unwrap()).unwrap();
        let record_tag = db
            .lines()
            .find(|l| l.contains(r#"name="com.example.sideload""#))
            .unwrap();
        assert!(record_tag.contains(r#"installer="com.android.vending""#));
    }

    #[test]
    fn split_apks_use_an_install_session() {
        let tmp = tempfile::tempdir().unwrap();
        let t = transport_with_db();
        t.set_file("/data/app/x/base.apk", b"base");
        t.set_file("/data/app/x/split_config.arm64.apk", b"split");
        t.script(
            "pm path com.example.sideload",
            "package:/data/app/x/base.apk\npackage:/data/app/x/split_config.arm64.apk",
            0,
        );
        t.script("pm uninstall com.example.sideload", "Success", 0);
        t.script("pm install-create", "Success: created install session [77]", 0);
        t.script("pm install-write 77 split0 /data/local/tmp/base.apk", "Success", 0);
        t.script(
            "pm install-write 77 split1 /data/local/tmp/split_config.arm64.apk",
            "Success",
            0,
        );
        t.script("pm install-commit 77", "Success", 0);

        reinstall(
            &t,
            &Paths::at(tmp.path()),
            "com.example.sideload",
            device::PLAY_STORE_PACKAGE,
        )
        .unwrap();
    }

    #[test]
    fn unknown_package_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let t = transport_with_db();
        t.script("pm path com.example.ghost", "", 0);

        let err = reinstall(
            &t,
            &Paths::at(tmp.path()),
            "com.example.ghost",
            device::PLAY_STORE_PACKAGE,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }
}
