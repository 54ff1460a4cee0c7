// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keybox manager: batch import into the local cache, listing, and pushes
// to the device with a per-destination backup slot.
//
// Cache keys are the credential's own leaf serial, never the filename;
// re-importing the same credential overwrites its cache entry
// (last-valid-wins). Pushes back up whatever currently sits at the
// destination into a single slot per destination filename, overwritten on
// each push; this is deliberately separate from the sequence-numbered
// database backup history.

use std::path::Path;

use integritykit_adb::DeviceTransport;
use integritykit_core::config::{Paths, device};
use integritykit_core::error::{IntegrityError, Result};
use integritykit_store::{ArtifactRecord, ArtifactStore};
use tracing::{info, instrument, warn};

use crate::crl::{CrlValidator, KeyboxValidation};
use crate::parse::{ParsedKeybox, parse_keybox};

/// Cache namespace holding keybox records.
pub const KEYBOX_NAMESPACE: &str = "keyboxes";

/// Software-only credential shipped with the tool for `--push-aosp`.
pub const AOSP_KEYBOX_XML: &str = include_str!("../data/keybox_aosp.xml");

/// What to push: a cached credential or the built-in software one.
#[derive(Debug, Clone)]
pub enum KeyboxSelection {
    Cached(String),
    BuiltinAosp,
}

/// Result of a batch import. Rejections carry per-file reasons; a batch
/// with failures is still a success for the files that validated.
#[derive(Debug, Default)]
pub struct ImportOutcome {
    /// Serials imported, in file order.
    pub imported: Vec<String>,
    /// (file name, rejection reason) pairs.
    pub rejected: Vec<(String, String)>,
}

impl ImportOutcome {
    pub fn imported_count(&self) -> usize {
        self.imported.len()
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

pub struct KeyboxManager {
    store: ArtifactStore,
    paths: Paths,
}

impl KeyboxManager {
    pub fn new(paths: &Paths) -> Self {
        Self {
            store: ArtifactStore::new(paths),
            paths: paths.clone(),
        }
    }

    /// Validate and import every `.xml` candidate at `path` (file or
    /// directory). Only `Valid` candidates enter the cache; rejected files
    /// are reported individually and never abort the batch.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn import(&self, path: impl AsRef<Path>, validator: &CrlValidator) -> Result<ImportOutcome> {
        let path = path.as_ref();
        let candidates = collect_candidates(path)?;
        if candidates.is_empty() {
            return Err(IntegrityError::NotFound(format!(
                "no .xml keybox candidates at {}",
                path.display()
            )));
        }

        let mut outcome = ImportOutcome::default();
        for candidate in candidates {
            let file_name = candidate
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| candidate.display().to_string());

            let xml = match std::fs::read_to_string(&candidate) {
                Ok(xml) => xml,
                Err(e) => {
                    outcome.rejected.push((file_name, format!("unreadable: {e}")));
                    continue;
                }
            };

            match validator.validate(&xml) {
                KeyboxValidation::Valid(parsed) => {
                    let serial = parsed.primary_serial().to_owned();
                    self.store_keybox(&parsed, &xml, &file_name)?;
                    info!(serial, file = %file_name, "keybox imported");
                    outcome.imported.push(serial);
                }
                KeyboxValidation::Revoked {
                    revoked_serials, ..
                } => {
                    warn!(file = %file_name, ?revoked_serials, "keybox revoked");
                    outcome.rejected.push((
                        file_name,
                        format!("revoked serial(s): {}", revoked_serials.join(", ")),
                    ));
                }
                KeyboxValidation::Malformed { reason } => {
                    warn!(file = %file_name, %reason, "keybox malformed");
                    outcome.rejected.push((file_name, reason));
                }
            }
        }
        Ok(outcome)
    }

    /// Validate candidates without touching the cache. Returns
    /// `(valid: (file, serial summaries), rejected: (file, reason))`.
    pub fn import_dry_run(
        &self,
        path: impl AsRef<Path>,
        validator: &CrlValidator,
    ) -> Result<(Vec<(String, Vec<String>)>, Vec<(String, String)>)> {
        let path = path.as_ref();
        let candidates = collect_candidates(path)?;
        if candidates.is_empty() {
            return Err(IntegrityError::NotFound(format!(
                "no .xml keybox candidates at {}",
                path.display()
            )));
        }

        let mut valid = Vec::new();
        let mut rejected = Vec::new();
        for candidate in candidates {
            let file_name = candidate
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| candidate.display().to_string());
            let xml = match std::fs::read_to_string(&candidate) {
                Ok(xml) => xml,
                Err(e) => {
                    rejected.push((file_name, format!("unreadable: {e}")));
                    continue;
                }
            };
            match validator.validate(&xml) {
                KeyboxValidation::Valid(parsed) => {
                    valid.push((file_name, parsed.serial_summary()));
                }
                KeyboxValidation::Revoked {
                    revoked_serials, ..
                } => rejected.push((
                    file_name,
                    format!("revoked serial(s): {}", revoked_serials.join(", ")),
                )),
                KeyboxValidation::Malformed { reason } => rejected.push((file_name, reason)),
            }
        }
        Ok((valid, rejected))
    }

    fn store_keybox(&self, parsed: &ParsedKeybox, xml: &str, source_file: &str) -> Result<()> {
        let mut record = ArtifactRecord::new(
            parsed.primary_serial().to_owned(),
            serde_json::Value::String(xml.to_owned()),
        )
        .with_metadata("source_file", source_file)
        .with_metadata("serials", parsed.serial_summary().join("; "));
        if let Some(device_id) = &parsed.device_id {
            record = record.with_metadata("device_id", device_id.clone());
        }
        self.store.put(KEYBOX_NAMESPACE, record)
    }

    /// Cached keyboxes in snapshot order.
    pub fn list_local(&self) -> Result<Vec<ArtifactRecord>> {
        self.store.list(KEYBOX_NAMESPACE)
    }

    /// Keybox files currently present on the device.
    pub fn list_remote(&self, transport: &dyn DeviceTransport) -> Result<Vec<String>> {
        let out = transport.shell_su(&format!(
            "find {} -maxdepth 1 -name '*.xml'",
            device::TEE_BASE_DIR
        ))?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.rsplit('/').next().unwrap_or(l).to_owned())
            .collect())
    }

    /// Pull a keybox file from the device for inspection.
    pub fn show_remote(&self, transport: &dyn DeviceTransport, name: &str) -> Result<String> {
        let remote = format!("{}/{name}", device::TEE_BASE_DIR);
        let bytes = transport.pull_as_root(&remote)?;
        String::from_utf8(bytes)
            .map_err(|_| IntegrityError::ValidationFailed {
                item: name.to_owned(),
                reason: "device file is not UTF-8 text".into(),
            })
    }

    /// Push a credential to `destination_name` under the TEE base dir.
    ///
    /// The current on-device file (if any) is backed up first into the
    /// per-destination slot; the payload is structurally re-validated
    /// before anything touches the device.
    #[instrument(skip_all, fields(destination_name))]
    pub fn push(
        &self,
        transport: &dyn DeviceTransport,
        selection: &KeyboxSelection,
        destination_name: &str,
    ) -> Result<()> {
        let payload: String = match selection {
            KeyboxSelection::Cached(serial) => {
                let record = self.store.get(KEYBOX_NAMESPACE, serial).map_err(|_| {
                    let available = self
                        .store
                        .keys(KEYBOX_NAMESPACE)
                        .unwrap_or_default()
                        .join(", ");
                    IntegrityError::UnknownKey {
                        key: serial.clone(),
                        available: if available.is_empty() {
                            "none".into()
                        } else {
                            available
                        },
                    }
                })?;
                record
                    .payload_str()
                    .ok_or_else(|| IntegrityError::CacheCorrupt {
                        path: KEYBOX_NAMESPACE.into(),
                        detail: format!("record '{serial}' payload is not text"),
                    })?
                    .to_owned()
            }
            KeyboxSelection::BuiltinAosp => {
                info!("using built-in AOSP software keybox");
                AOSP_KEYBOX_XML.to_owned()
            }
        };

        // Refuse to push anything the device-side consumer couldn't read.
        parse_keybox(&payload).map_err(|reason| IntegrityError::ValidationFailed {
            item: destination_name.to_owned(),
            reason: format!("refusing to push: {reason}"),
        })?;

        let remote_path = format!("{}/{destination_name}", device::TEE_BASE_DIR);
        self.backup_destination(transport, destination_name, &remote_path)?;

        transport.push_as_root(payload.as_bytes(), &remote_path)?;
        info!(remote_path, "keybox pushed");
        Ok(())
    }

    /// One backup slot per destination filename, overwritten on each push.
    fn backup_destination(
        &self,
        transport: &dyn DeviceTransport,
        destination_name: &str,
        remote_path: &str,
    ) -> Result<()> {
        match transport.pull_as_root(remote_path) {
            Ok(bytes) => {
                let slot = self
                    .paths
                    .keybox_backup_dir()
                    .join(format!("{destination_name}.bak"));
                std::fs::write(&slot, &bytes)?;
                info!(slot = %slot.display(), "existing device keybox backed up");
            }
            Err(IntegrityError::NotFound(_)) => {
                warn!(remote_path, "no existing file at destination, skipping backup");
            }
            Err(other) => return Err(other),
        }
        Ok(())
    }
}

fn collect_candidates(path: &Path) -> Result<Vec<std::path::PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(IntegrityError::NotFound(format!("path {}", path.display())));
    }
    let mut files: Vec<_> = std::fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "xml"))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::fixtures::*;
    use integritykit_adb::StubTransport;

    fn manager() -> (tempfile::TempDir, KeyboxManager) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::at(tmp.path().join("state"));
        (tmp, KeyboxManager::new(&paths))
    }

    fn no_revocations() -> CrlValidator {
        CrlValidator::new(Default::default())
    }

    #[test]
    fn batch_import_counts_and_keys_by_serial() {
        let (tmp, mgr) = manager();
        let dir = tmp.path().join("candidates");
        std::fs::create_dir(&dir).unwrap();

        // Three parsable keyboxes (distinct primary serials) and one
        // malformed file: 3 imported, 1 rejected, keys are serials.
        std::fs::write(dir.join("a.xml"), keybox_xml("a", CERT_EC_B64, CERT_EC_B64)).unwrap();
        std::fs::write(dir.join("b.xml"), keybox_xml("b", CERT_ALT_B64, CERT_ALT_B64)).unwrap();
        std::fs::write(dir.join("c.xml"), keybox_xml("c", CERT_RSA_B64, CERT_RSA_B64)).unwrap();
        std::fs::write(dir.join("d.xml"), "<broken>").unwrap();

        let outcome = mgr.import(&dir, &no_revocations()).unwrap();
        assert_eq!(outcome.imported_count(), 3);
        assert_eq!(outcome.rejected_count(), 1);
        assert_eq!(outcome.rejected[0].0, "d.xml");

        let mut keys: Vec<String> = mgr.list_local().unwrap().into_iter().map(|r| r.key).collect();
        keys.sort();
        let mut expected = vec![
            CERT_EC_SERIAL.to_string(),
            CERT_ALT_SERIAL.to_string(),
            CERT_RSA_SERIAL.to_string(),
        ];
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[test]
    fn revoked_candidates_are_rejected_with_reason() {
        let (tmp, mgr) = manager();
        let f = tmp.path().join("hot.xml");
        std::fs::write(&f, keybox_xml("d", CERT_EC_B64, CERT_RSA_B64)).unwrap();

        let validator = CrlValidator::new([CERT_RSA_SERIAL.to_string()].into_iter().collect());
        let outcome = mgr.import(&f, &validator).unwrap();

        assert_eq!(outcome.imported_count(), 0);
        assert_eq!(outcome.rejected_count(), 1);
        assert!(outcome.rejected[0].1.contains("revoked"));
        assert!(mgr.list_local().unwrap().is_empty());
    }

    #[test]
    fn reimport_same_serial_overwrites() {
        let (tmp, mgr) = manager();
        let f1 = tmp.path().join("one.xml");
        let f2 = tmp.path().join("two.xml");
        std::fs::write(&f1, keybox_xml("first", CERT_EC_B64, CERT_RSA_B64)).unwrap();
        std::fs::write(&f2, keybox_xml("second", CERT_EC_B64, CERT_RSA_B64)).unwrap();

        mgr.import(&f1, &no_revocations()).unwrap();
        mgr.import(&f2, &no_revocations()).unwrap();

        let records = mgr.list_local().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata["device_id"], "second");
    }

    #[test]
    fn push_unknown_serial_reports_available() {
        let (tmp, mgr) = manager();
        let f = tmp.path().join("kb.xml");
        std::fs::write(&f, keybox_xml("d", CERT_EC_B64, CERT_RSA_B64)).unwrap();
        mgr.import(&f, &no_revocations()).unwrap();

        let transport = StubTransport::new();
        let err = mgr
            .push(&transport, &KeyboxSelection::Cached("ffff".into()), "keybox.xml")
            .unwrap_err();
        assert_eq!(err.kind(), "unknown-key");
        assert!(err.to_string().contains(CERT_EC_SERIAL));
    }

    #[test]
    fn push_backs_up_existing_destination_then_replaces() {
        let (tmp, mgr) = manager();
        let f = tmp.path().join("kb.xml");
        std::fs::write(&f, keybox_xml("d", CERT_EC_B64, CERT_RSA_B64)).unwrap();
        mgr.import(&f, &no_revocations()).unwrap();

        let transport = StubTransport::new();
        let dest = format!("{}/keybox.xml", device::TEE_BASE_DIR);
        transport.set_file(&dest, b"previous-device-keybox");

        mgr.push(
            &transport,
            &KeyboxSelection::Cached(CERT_EC_SERIAL.into()),
            "keybox.xml",
        )
        .unwrap();

        // Device now carries the cached credential.
        let pushed = transport.file_contents(&dest).unwrap();
        assert!(String::from_utf8(pushed).unwrap().contains("<AndroidAttestation"));

        // The previous device file landed in the per-destination slot.
        let slot = mgr.paths.keybox_backup_dir().join("keybox.xml.bak");
        assert_eq!(std::fs::read(slot).unwrap(), b"previous-device-keybox");
    }

    #[test]
    fn push_aosp_works_without_cache() {
        let (_tmp, mgr) = manager();
        let transport = StubTransport::new();

        mgr.push(&transport, &KeyboxSelection::BuiltinAosp, "keybox.xml")
            .unwrap();

        let dest = format!("{}/keybox.xml", device::TEE_BASE_DIR);
        let pushed = String::from_utf8(transport.file_contents(&dest).unwrap()).unwrap();
        assert!(pushed.contains("aosp-software"));
    }

    #[test]
    fn list_remote_reports_basenames() {
        let (_tmp, mgr) = manager();
        let transport = StubTransport::new();
        transport.set_file("/data/adb/tricky_store/keybox.xml", b"x");
        transport.set_file("/data/adb/tricky_store/spare.xml", b"y");
        transport.set_file("/data/adb/tricky_store/target.txt", b"z");

        let mut names = mgr.list_remote(&transport).unwrap();
        names.sort();
        assert_eq!(names, vec!["keybox.xml", "spare.xml"]);
    }
}
