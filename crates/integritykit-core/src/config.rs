// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local state directory layout and device-side path constants.

use std::path::{Path, PathBuf};

/// Device-side paths and process names.
pub mod device {
    /// Base directory of the TEE-emulation module's configuration.
    pub const TEE_BASE_DIR: &str = "/data/adb/tricky_store";
    /// Per-package keybox routing rules.
    pub const TARGET_FILE: &str = "/data/adb/tricky_store/target.txt";
    /// Patch-level override file.
    pub const PATCH_FILE: &str = "/data/adb/tricky_store/security_patch.txt";
    /// Destination of the generated device-identity JSON.
    pub const PIF_JSON_PATH: &str = "/data/adb/pif.json";
    /// Process that consumes the identity profile; killed to force reload.
    pub const DROIDGUARD_PROCESS: &str = "com.google.android.gms.unstable";
    /// The package manager's installer-attribution database.
    pub const PACKAGES_XML: &str = "/data/system/packages.xml";
    /// Companion warnings database, rewritten clean alongside a patch.
    pub const PACKAGES_WARNINGS_XML: &str = "/data/system/packages-warnings.xml";
    /// Canonical Play Store installer id.
    pub const PLAY_STORE_PACKAGE: &str = "com.android.vending";
    /// World-writable staging directory used for root-protected transfers.
    pub const STAGING_DIR: &str = "/data/local/tmp";
    /// Revocation list endpoint for attestation credentials.
    pub const CRL_URL: &str = "https://android.googleapis.com/attestation/status";
}

/// Resolved layout of IntegrityKit's local state directory.
///
/// Everything the tool persists (cache namespaces, database backups,
/// keybox push-backup slots, pulled device configs) lives under one root
/// so it can be inspected or wiped as a unit.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Resolve the state directory from the environment, creating it if
    /// needed. Tries `XDG_DATA_HOME`, then `~/.local/share`, then `/tmp`.
    pub fn resolve() -> Self {
        let base = if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            PathBuf::from(xdg)
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home).join(".local").join("share")
        } else {
            PathBuf::from("/tmp")
        };
        Self::at(base.join("integritykit"))
    }

    /// Use an explicit root (tests, `--state-dir` override).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        std::fs::create_dir_all(&root).ok();
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot file for a cache namespace (`profiles`, `keyboxes`).
    pub fn namespace_file(&self, namespace: &str) -> PathBuf {
        self.root.join(format!("{namespace}.json"))
    }

    /// Directory of sequence-numbered device-database backups.
    pub fn backups_dir(&self) -> PathBuf {
        self.subdir("backups")
    }

    /// Per-destination backup slots for keybox pushes.
    pub fn keybox_backup_dir(&self) -> PathBuf {
        self.subdir("keybox-backups")
    }

    /// Local editable copies of pulled device config files.
    pub fn device_configs_dir(&self) -> PathBuf {
        self.subdir("device_configs")
    }

    fn subdir(&self, name: &str) -> PathBuf {
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir).ok();
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_under_root() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::at(tmp.path());

        assert_eq!(paths.namespace_file("profiles"), tmp.path().join("profiles.json"));
        assert!(paths.backups_dir().is_dir());
        assert!(paths.device_configs_dir().starts_with(tmp.path()));
    }
}
