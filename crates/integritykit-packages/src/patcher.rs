// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transport-facing database patcher.
//
// Read-modify-write with a mandatory backup: `write_database` snapshots
// the pre-mutation bytes under the next sequence number before anything
// is pushed, so every error past that point still leaves a valid restore
// path. The push itself is a single whole-file replacement finished by a
// device-side `mv`; ownership, mode, and SELinux context are restored
// afterwards so the package manager can always re-read its own file.

use integritykit_adb::DeviceTransport;
use integritykit_core::config::{Paths, device};
use integritykit_core::error::{IntegrityError, Result};
use integritykit_store::{BackupEntry, BackupStore};
use tracing::{info, instrument, warn};

use crate::database::PackageDb;

/// Replacement content for the companion warnings database. A patched
/// main database with stale warnings entries makes the package manager
/// re-flag the very records that were just rewritten.
const CLEAN_WARNINGS_DOC: &str =
    "<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><packages />";

pub struct PackagesPatcher<'t> {
    transport: &'t dyn DeviceTransport,
    backups: BackupStore,
}

impl<'t> PackagesPatcher<'t> {
    pub fn new(transport: &'t dyn DeviceTransport, paths: &Paths) -> Result<Self> {
        Ok(Self {
            transport,
            backups: BackupStore::open(paths, "packages.xml")?,
        })
    }

    /// Pull and parse the current database. Returns the parsed model and
    /// the exact pulled bytes (the backup snapshot for a later write).
    /// Parse failure is fatal for the command and precedes any write.
    #[instrument(skip_all)]
    pub fn read_database(&self) -> Result<(PackageDb, Vec<u8>)> {
        let raw = self.transport.pull_as_root(device::PACKAGES_XML)?;
        let text = std::str::from_utf8(&raw)
            .map_err(|_| IntegrityError::ParseError("database is not UTF-8 text".into()))?;
        let db = PackageDb::parse(text)?;
        Ok((db, raw))
    }

    /// Push the mutated database, backing up `pre_mutation` first.
    ///
    /// The backup is created and persisted before the device sees a single
    /// byte; if the push fails the backup stays valid and the on-device
    /// state is unchanged.
    #[instrument(skip_all)]
    pub fn write_database(&self, db: &PackageDb, pre_mutation: &[u8]) -> Result<BackupEntry> {
        let entry = self.backups.create(pre_mutation)?;
        info!(sequence = entry.sequence, "pre-mutation backup stored");

        let document = db.to_document();
        self.transport
            .push_as_root(document.as_bytes(), device::PACKAGES_XML)?;
        self.transport
            .push_as_root(CLEAN_WARNINGS_DOC.as_bytes(), device::PACKAGES_WARNINGS_XML)?;
        self.finalize_permissions()?;

        info!(len = document.len(), "database replaced on device");
        Ok(entry)
    }

    /// Push backup `sequence` back to the device byte-for-byte.
    #[instrument(skip_all, fields(sequence))]
    pub fn restore(&self, sequence: u64) -> Result<()> {
        let snapshot = self.backups.read(sequence)?;
        self.transport
            .push_as_root(&snapshot, device::PACKAGES_XML)?;
        self.finalize_permissions()?;
        info!(sequence, "database restored from backup");
        Ok(())
    }

    /// Backups ordered by sequence, newest last.
    pub fn list_backups(&self) -> Result<Vec<BackupEntry>> {
        self.backups.list()
    }

    pub fn backup_count(&self) -> Result<usize> {
        self.backups.count()
    }

    /// Ownership, mode, and SELinux context the package manager expects.
    fn finalize_permissions(&self) -> Result<()> {
        let files = format!("{} {}", device::PACKAGES_XML, device::PACKAGES_WARNINGS_XML);
        self.transport.shell_su(&format!("chown system:system {files}"))?;
        self.transport.shell_su(&format!("chmod 640 {files}"))?;
        if let Err(e) = self.transport.shell_su(&format!("restorecon {files}")) {
            // Missing restorecon (some recoveries) is survivable; a wrong
            // owner or mode is not.
            warn!(error = %e, "restorecon failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::fixtures::MIXED_DB;
    use crate::database::{PackageFilter, PatchTarget};
    use integritykit_adb::StubTransport;

    fn setup() -> (tempfile::TempDir, StubTransport) {
        let tmp = tempfile::tempdir().unwrap();
        let transport = StubTransport::new();
        transport.set_file(device::PACKAGES_XML, MIXED_DB.as_bytes());
        (tmp, transport)
    }

    #[test]
    fn write_creates_exactly_one_backup() {
        let (tmp, transport) = setup();
        let paths = Paths::at(tmp.path());
        let patcher = PackagesPatcher::new(&transport, &paths).unwrap();

        let (mut db, raw) = patcher.read_database().unwrap();
        db.patch(&PackageFilter::Sideloaded, &PatchTarget::play_store())
            .unwrap();

        let before = patcher.backup_count().unwrap();
        let entry = patcher.write_database(&db, &raw).unwrap();
        assert_eq!(patcher.backup_count().unwrap(), before + 1);
        assert_eq!(entry.sequence, 1);

        // Device now carries the patched document.
        let on_device = transport.file_contents(device::PACKAGES_XML).unwrap();
        let on_device = String::from_utf8(on_device).unwrap();
        assert!(on_device.contains(r#"name="com.example.sideload""#));
        assert!(!on_device.contains("isOrphaned"));

        // Warnings database was rewritten clean.
        let warnings = transport
            .file_contents(device::PACKAGES_WARNINGS_XML)
            .unwrap();
        assert_eq!(warnings, CLEAN_WARNINGS_DOC.as_bytes());
    }

    #[test]
    fn restore_reproduces_pre_mutation_bytes() {
        let (tmp, transport) = setup();
        let paths = Paths::at(tmp.path());
        let patcher = PackagesPatcher::new(&transport, &paths).unwrap();

        let (mut db, raw) = patcher.read_database().unwrap();
        db.patch(&PackageFilter::Sideloaded, &PatchTarget::play_store())
            .unwrap();
        let entry = patcher.write_database(&db, &raw).unwrap();

        // The device was mutated...
        assert_ne!(
            transport.file_contents(device::PACKAGES_XML).unwrap(),
            MIXED_DB.as_bytes()
        );

        // ...and restore brings back the exact original bytes.
        patcher.restore(entry.sequence).unwrap();
        assert_eq!(
            transport.file_contents(device::PACKAGES_XML).unwrap(),
            MIXED_DB.as_bytes()
        );
    }

    #[test]
    fn failed_push_keeps_backup_and_device_state() {
        let (tmp, transport) = setup();
        let paths = Paths::at(tmp.path());
        let patcher = PackagesPatcher::new(&transport, &paths).unwrap();

        let (mut db, raw) = patcher.read_database().unwrap();
        db.patch(&PackageFilter::Sideloaded, &PatchTarget::play_store())
            .unwrap();

        transport.fail_pushes(true);
        assert!(patcher.write_database(&db, &raw).is_err());

        // Backup was taken before the push attempt; device untouched.
        assert_eq!(patcher.backup_count().unwrap(), 1);
        assert_eq!(
            transport.file_contents(device::PACKAGES_XML).unwrap(),
            MIXED_DB.as_bytes()
        );
        assert_eq!(patcher.backups.read(1).unwrap(), MIXED_DB.as_bytes());
    }

    #[test]
    fn restore_of_unknown_sequence_fails_with_available_list() {
        let (tmp, transport) = setup();
        let paths = Paths::at(tmp.path());
        let patcher = PackagesPatcher::new(&transport, &paths).unwrap();

        let err = patcher.restore(3).unwrap_err();
        assert_eq!(err.kind(), "backup-not-found");
    }

    #[test]
    fn unparsable_database_aborts_before_any_write() {
        let tmp = tempfile::tempdir().unwrap();
        let transport = StubTransport::new();
        transport.set_file(device::PACKAGES_XML, b"\xff\xfe binary junk");

        let paths = Paths::at(tmp.path());
        let patcher = PackagesPatcher::new(&transport, &paths).unwrap();

        let err = patcher.read_database().unwrap_err();
        assert_eq!(err.kind(), "parse-error");
        assert_eq!(patcher.backup_count().unwrap(), 0);
        assert_eq!(
            transport.file_contents(device::PACKAGES_XML).unwrap(),
            b"\xff\xfe binary junk"
        );
    }
}
