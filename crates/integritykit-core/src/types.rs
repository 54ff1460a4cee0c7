// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for IntegrityKit.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A device-identity profile as fetched from the remote profile source.
///
/// Immutable once fetched; a fetch replaces the entire local cache
/// snapshot, so a `Profile` always belongs to exactly one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Marketing model name (e.g. "Pixel 8 Pro").
    pub model: String,
    /// Product ID, the unique selection key (e.g. "husky_beta").
    pub product: String,
    /// Full build fingerprint.
    pub fingerprint: String,
    /// Security patch level, `YYYY-MM-DD`.
    pub security_patch: String,
}

impl Profile {
    /// Serialize to the structured form the on-device attestation-emulation
    /// module reads (`pif.json`).
    pub fn identity_json(&self) -> serde_json::Value {
        json!({
            "FINGERPRINT": self.fingerprint,
            "MANUFACTURER": "Google",
            "MODEL": self.model,
            "SECURITY_PATCH": self.security_patch,
        })
    }
}

/// How an error should be treated by the transport retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Device temporarily unreachable/unauthorized; bounded auto-retry.
    Transient,
    /// Application-level failure (validation, parse); never retried.
    Permanent,
}

/// Human-readable labels for the `packageSource` attribute values the
/// package manager records.
pub fn package_source_label(code: &str) -> String {
    match code {
        "0" => "Unspecified".into(),
        "1" => "Other".into(),
        "2" => "Store".into(),
        "3" => "Local File".into(),
        "4" => "Downloaded File".into(),
        other => format!("Unknown ({other})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_json_shape() {
        let p = Profile {
            model: "Pixel 8".into(),
            product: "shiba_beta".into(),
            fingerprint: "google/shiba_beta/shiba:15/AP31/12345:user/release-keys".into(),
            security_patch: "2025-07-05".into(),
        };
        let v = p.identity_json();
        assert_eq!(v["MODEL"], "Pixel 8");
        assert_eq!(v["MANUFACTURER"], "Google");
        assert_eq!(v["SECURITY_PATCH"], "2025-07-05");
    }

    #[test]
    fn source_labels() {
        assert_eq!(package_source_label("2"), "Store");
        assert_eq!(package_source_label("9"), "Unknown (9)");
    }
}
