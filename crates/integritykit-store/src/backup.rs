// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sequence-numbered device-database backups.
//
// Each backup is a full pre-mutation snapshot, written once and never
// auto-deleted. Sequence numbers are monotonically increasing per
// database name; restore returns the exact bytes captured at creation.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use integritykit_core::config::Paths;
use integritykit_core::error::{IntegrityError, Result};
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

/// Metadata of one stored backup.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
    pub size: u64,
}

impl BackupEntry {
    /// Short SHA-256 fingerprint of the snapshot, for listings.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = std::fs::read(&self.path)?;
        let digest = Sha256::digest(&bytes);
        Ok(hex::encode(&digest[..8]))
    }
}

/// Append-only backup directory for one device database.
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    /// Open the backup directory for `database_name` (e.g. "packages.xml").
    pub fn open(paths: &Paths, database_name: &str) -> Result<Self> {
        let dir = paths.backups_dir().join(database_name);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// All backups ordered by sequence number, newest last.
    pub fn list(&self) -> Result<Vec<BackupEntry>> {
        let mut entries = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            let Some(entry) = parse_backup_name(&name) else {
                continue;
            };
            let meta = dirent.metadata()?;
            entries.push(BackupEntry {
                sequence: entry.0,
                timestamp: entry.1,
                path: dirent.path(),
                size: meta.len(),
            });
        }
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    /// Store a new snapshot under the next sequence number.
    #[instrument(skip_all, fields(len = snapshot.len()))]
    pub fn create(&self, snapshot: &[u8]) -> Result<BackupEntry> {
        let sequence = self.list()?.last().map_or(1, |e| e.sequence + 1);
        let timestamp = Utc::now();
        let path = self
            .dir
            .join(format!("{:05}.{}.bak", sequence, timestamp.timestamp()));

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(snapshot)?;
        tmp.persist(&path)
            .map_err(|e| IntegrityError::Io(e.error))?;

        info!(sequence, path = %path.display(), "backup created");
        Ok(BackupEntry {
            sequence,
            timestamp,
            path,
            size: snapshot.len() as u64,
        })
    }

    /// Exact bytes of backup `sequence`; `BackupNotFound` lists the valid
    /// sequence numbers when it is absent.
    pub fn read(&self, sequence: u64) -> Result<Vec<u8>> {
        let entries = self.list()?;
        let Some(entry) = entries.iter().find(|e| e.sequence == sequence) else {
            let available = if entries.is_empty() {
                "none".to_owned()
            } else {
                entries
                    .iter()
                    .map(|e| e.sequence.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            return Err(IntegrityError::BackupNotFound {
                sequence,
                available,
            });
        };
        Ok(std::fs::read(&entry.path)?)
    }
}

/// Parse `NNNNN.<unix_ts>.bak` into (sequence, timestamp).
fn parse_backup_name(name: &str) -> Option<(u64, DateTime<Utc>)> {
    let mut parts = name.strip_suffix(".bak")?.splitn(2, '.');
    let sequence: u64 = parts.next()?.parse().ok()?;
    let ts: i64 = parts.next()?.parse().ok()?;
    Some((sequence, Utc.timestamp_opt(ts, 0).single()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (tempfile::TempDir, BackupStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackupStore::open(&Paths::at(tmp.path()), "packages.xml").unwrap();
        (tmp, store)
    }

    #[test]
    fn sequences_are_monotonic() {
        let (_tmp, store) = open_store();
        assert_eq!(store.create(b"one").unwrap().sequence, 1);
        assert_eq!(store.create(b"two").unwrap().sequence, 2);
        assert_eq!(store.create(b"three").unwrap().sequence, 3);

        let listed: Vec<u64> = store.list().unwrap().iter().map(|e| e.sequence).collect();
        assert_eq!(listed, vec![1, 2, 3]);
    }

    #[test]
    fn read_returns_exact_bytes() {
        let (_tmp, store) = open_store();
        let snapshot = b"<packages>\xc3\xa9 raw bytes</packages>";
        let entry = store.create(snapshot).unwrap();
        assert_eq!(store.read(entry.sequence).unwrap(), snapshot);
    }

    #[test]
    fn missing_sequence_lists_available() {
        let (_tmp, store) = open_store();
        store.create(b"one").unwrap();
        store.create(b"two").unwrap();

        let err = store.read(9).unwrap_err();
        assert_eq!(err.kind(), "backup-not-found");
        assert!(err.to_string().contains("1, 2"));
    }

    #[test]
    fn databases_do_not_share_sequences() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::at(tmp.path());
        let a = BackupStore::open(&paths, "packages.xml").unwrap();
        let b = BackupStore::open(&paths, "packages-warnings.xml").unwrap();

        a.create(b"a1").unwrap();
        a.create(b"a2").unwrap();
        assert_eq!(b.create(b"b1").unwrap().sequence, 1);
    }
}
