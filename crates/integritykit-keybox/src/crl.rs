// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keybox validation against the attestation revocation list.
//
// Two-stage pipeline: structural integrity first, then revocation lookup.
// A candidate that cannot be parsed is Malformed and never reaches the
// revocation check; the verdict keeps the rejection reason so batch
// imports can report per-file outcomes.

use std::collections::BTreeSet;
use std::time::Duration;

use integritykit_core::error::{IntegrityError, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::parse::{ParsedKeybox, parse_keybox};

/// Verdict for one keybox candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyboxValidation {
    /// Structurally sound and no leaf serial is revoked.
    Valid(ParsedKeybox),
    /// Structurally sound but at least one leaf serial is on the list.
    Revoked {
        keybox: ParsedKeybox,
        revoked_serials: Vec<String>,
    },
    /// Could not be parsed; never checked against the list.
    Malformed { reason: String },
}

/// Wire shape of the attestation status endpoint.
#[derive(Debug, Deserialize)]
struct CrlResponse {
    entries: serde_json::Map<String, serde_json::Value>,
}

/// Revocation checker over a set of revoked serial numbers.
pub struct CrlValidator {
    revoked: BTreeSet<String>,
}

impl CrlValidator {
    /// Build from an already-obtained set of revoked serials.
    pub fn new(revoked: BTreeSet<String>) -> Self {
        Self {
            revoked: revoked.into_iter().map(|s| s.to_ascii_lowercase()).collect(),
        }
    }

    /// Fetch the revocation list from `url`.
    pub fn fetch(url: &str) -> Result<Self> {
        info!(url, "fetching revocation list");
        let response = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(10))
            .build()
            .get(url)
            .call()
            .map_err(|e| IntegrityError::FetchFailed(format!("CRL fetch: {e}")))?;

        let body: CrlResponse = response
            .into_json()
            .map_err(|e| IntegrityError::FetchFailed(format!("CRL decode: {e}")))?;

        let revoked: BTreeSet<String> = body
            .entries
            .keys()
            .map(|s| s.to_ascii_lowercase())
            .collect();
        info!(entries = revoked.len(), "revocation list loaded");
        Ok(Self::new(revoked))
    }

    pub fn is_revoked(&self, serial: &str) -> bool {
        self.revoked.contains(&serial.to_ascii_lowercase())
    }

    /// Validate a keybox candidate: structure first, then revocation.
    pub fn validate(&self, xml: &str) -> KeyboxValidation {
        let keybox = match parse_keybox(xml) {
            Ok(parsed) => parsed,
            Err(reason) => {
                debug!(%reason, "candidate malformed");
                return KeyboxValidation::Malformed { reason };
            }
        };

        let revoked_serials: Vec<String> = keybox
            .keys
            .iter()
            .filter(|k| self.is_revoked(&k.leaf_serial))
            .map(|k| k.leaf_serial.clone())
            .collect();

        if revoked_serials.is_empty() {
            KeyboxValidation::Valid(keybox)
        } else {
            KeyboxValidation::Revoked {
                keybox,
                revoked_serials,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::fixtures::*;

    fn validator(revoked: &[&str]) -> CrlValidator {
        CrlValidator::new(revoked.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn clean_keybox_is_valid() {
        let v = validator(&["1111", "2222"]);
        let xml = keybox_xml("d", CERT_EC_B64, CERT_RSA_B64);
        match v.validate(&xml) {
            KeyboxValidation::Valid(kb) => assert_eq!(kb.keys.len(), 2),
            other => panic!("expected Valid, got {other:?}"),
        }
    }

    #[test]
    fn any_revoked_leaf_marks_the_keybox() {
        // Only the RSA leaf is listed; the whole credential is revoked.
        let v = validator(&[CERT_RSA_SERIAL]);
        let xml = keybox_xml("d", CERT_EC_B64, CERT_RSA_B64);
        match v.validate(&xml) {
            KeyboxValidation::Revoked { revoked_serials, .. } => {
                assert_eq!(revoked_serials, vec![CERT_RSA_SERIAL.to_string()]);
            }
            other => panic!("expected Revoked, got {other:?}"),
        }
    }

    #[test]
    fn malformed_never_reaches_revocation_check() {
        let v = validator(&[CERT_EC_SERIAL]);
        match v.validate("<garbage/>") {
            KeyboxValidation::Malformed { reason } => {
                assert!(reason.contains("not a keybox"));
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn revocation_lookup_is_case_insensitive() {
        let v = validator(&["AABBCCDDEEFF1122"]);
        assert!(v.is_revoked(CERT_EC_SERIAL));
    }
}
