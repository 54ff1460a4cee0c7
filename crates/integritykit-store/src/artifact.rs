// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Namespace-keyed artifact cache.
//
// One JSON snapshot file per namespace (profiles, keyboxes). Keys are
// unique within a namespace with last-write-wins semantics. Every write
// goes through a temp file in the same directory followed by an atomic
// rename, so a crash mid-write leaves either the old snapshot or the new
// one, never a mix.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use integritykit_core::config::Paths;
use integritykit_core::error::{IntegrityError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// One entry in a cache namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Unique within the namespace.
    pub key: String,
    /// Payload: structured value for profiles, text blob for keyboxes.
    pub payload: serde_json::Value,
    /// Free-form string metadata used by listings.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ArtifactRecord {
    pub fn new(key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            payload,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    /// Payload as text, for namespaces whose payloads are text blobs.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_str()
    }
}

/// Durable keyed cache, one snapshot file per namespace.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    paths: Paths,
}

impl ArtifactStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            paths: paths.clone(),
        }
    }

    fn namespace_path(&self, namespace: &str) -> PathBuf {
        self.paths.namespace_file(namespace)
    }

    /// Load a namespace snapshot. A missing file is an empty namespace; an
    /// unparsable file is `CacheCorrupt` and is never treated as empty.
    fn load(&self, namespace: &str) -> Result<Vec<ArtifactRecord>> {
        let path = self.namespace_path(namespace);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| IntegrityError::CacheCorrupt {
            path: path.display().to_string(),
            detail: e.to_string(),
        })
    }

    /// Persist a namespace snapshot atomically (temp write, then rename).
    fn save(&self, namespace: &str, records: &[ArtifactRecord]) -> Result<()> {
        let path = self.namespace_path(namespace);
        let dir = path.parent().unwrap_or(self.paths.root());

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, records)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&path)
            .map_err(|e| IntegrityError::Io(e.error))?;

        debug!(namespace, records = records.len(), "snapshot persisted");
        Ok(())
    }

    /// Upsert a record. An existing key keeps its position in the
    /// snapshot; a new key is appended.
    #[instrument(skip_all, fields(namespace, key = %record.key))]
    pub fn put(&self, namespace: &str, record: ArtifactRecord) -> Result<()> {
        let mut records = self.load(namespace)?;
        match records.iter_mut().find(|r| r.key == record.key) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.save(namespace, &records)
    }

    pub fn get(&self, namespace: &str, key: &str) -> Result<ArtifactRecord> {
        self.load(namespace)?
            .into_iter()
            .find(|r| r.key == key)
            .ok_or_else(|| IntegrityError::NotFound(format!("record '{key}' in '{namespace}'")))
    }

    /// All records in snapshot order.
    pub fn list(&self, namespace: &str) -> Result<Vec<ArtifactRecord>> {
        self.load(namespace)
    }

    pub fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self.load(namespace)?.into_iter().map(|r| r.key).collect())
    }

    /// Atomic full-namespace overwrite. Readers never observe a partially
    /// written cache: the new snapshot becomes visible only at rename.
    #[instrument(skip_all, fields(namespace, records = records.len()))]
    pub fn replace_all(&self, namespace: &str, records: Vec<ArtifactRecord>) -> Result<()> {
        self.save(namespace, &records)
    }
}
