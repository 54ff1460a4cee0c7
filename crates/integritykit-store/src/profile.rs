// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device-identity profile cache.
//
// Profiles are fetched from a remote source as a complete set; a fetch
// replaces the whole cache snapshot. Applying a profile serialises the
// identity JSON the on-device module expects and pushes it, optionally
// killing the consuming process so it reloads.

use integritykit_adb::DeviceTransport;
use integritykit_core::config::Paths;
use integritykit_core::config::device;
use integritykit_core::error::{IntegrityError, Result};
use integritykit_core::types::Profile;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::artifact::{ArtifactRecord, ArtifactStore};

/// Cache namespace holding profile records.
pub const PROFILE_NAMESPACE: &str = "profiles";

/// Remote source of device-identity profiles.
pub trait ProfileSource {
    fn fetch_profiles(&self) -> Result<Vec<Profile>>;
}

/// Profile source backed by an HTTP endpoint returning a JSON array of
/// profiles. Network or decode failures surface as `FetchFailed` and
/// leave the local cache untouched.
pub struct HttpProfileSource {
    url: String,
    timeout: Duration,
}

impl HttpProfileSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(15),
        }
    }
}

impl ProfileSource for HttpProfileSource {
    fn fetch_profiles(&self) -> Result<Vec<Profile>> {
        info!(url = %self.url, "fetching profiles");
        let response = ureq::AgentBuilder::new()
            .timeout(self.timeout)
            .build()
            .get(&self.url)
            .call()
            .map_err(|e| IntegrityError::FetchFailed(format!("{}: {e}", self.url)))?;
        response
            .into_json::<Vec<Profile>>()
            .map_err(|e| IntegrityError::FetchFailed(format!("profile list decode: {e}")))
    }
}

/// Local cache of fetched profiles, keyed by product ID.
pub struct ProfileCache {
    store: ArtifactStore,
}

impl ProfileCache {
    pub fn new(paths: &Paths) -> Self {
        Self {
            store: ArtifactStore::new(paths),
        }
    }

    /// Fetch from `source` and replace the entire cache snapshot.
    ///
    /// An empty result is a fetch failure: replacing a populated cache
    /// with nothing is never what the operator wants.
    #[instrument(skip_all)]
    pub fn fetch(&self, source: &dyn ProfileSource) -> Result<usize> {
        let profiles = source.fetch_profiles()?;
        if profiles.is_empty() {
            return Err(IntegrityError::FetchFailed(
                "source returned no profiles; cache left unchanged".into(),
            ));
        }

        let records: Vec<ArtifactRecord> = profiles
            .iter()
            .map(|p| {
                ArtifactRecord::new(p.product.clone(), serde_json::to_value(p).unwrap_or_default())
                    .with_metadata("model", p.model.clone())
                    .with_metadata("security_patch", p.security_patch.clone())
            })
            .collect();

        let count = records.len();
        self.store.replace_all(PROFILE_NAMESPACE, records)?;
        info!(count, "profile cache replaced");
        Ok(count)
    }

    /// Profiles in fetch order.
    pub fn list(&self) -> Result<Vec<Profile>> {
        self.store
            .list(PROFILE_NAMESPACE)?
            .into_iter()
            .map(|r| serde_json::from_value(r.payload).map_err(IntegrityError::from))
            .collect()
    }

    /// Look up a profile by its product ID.
    pub fn select(&self, product: &str) -> Result<Profile> {
        self.list()?
            .into_iter()
            .find(|p| p.product == product)
            .ok_or_else(|| {
                IntegrityError::NotFound(format!(
                    "profile '{product}' (run `integritykit pif list` for available products)"
                ))
            })
    }

    /// Pick an arbitrary cached profile.
    ///
    /// Index is derived from the wall clock; enough spread for an
    /// operator tool without carrying a PRNG dependency.
    pub fn select_random(&self) -> Result<Profile> {
        let profiles = self.list()?;
        if profiles.is_empty() {
            return Err(IntegrityError::NotFound(
                "profile cache is empty (run `integritykit pif fetch` first)".into(),
            ));
        }
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as usize)
            .unwrap_or(0);
        Ok(profiles[nanos % profiles.len()].clone())
    }

    /// Serialise `profile` to the on-device identity form and push it.
    /// With `kill_consumer`, the consuming process is terminated afterwards
    /// so the new identity is read on its next start.
    #[instrument(skip_all, fields(product = %profile.product))]
    pub fn apply(
        &self,
        profile: &Profile,
        transport: &dyn DeviceTransport,
        destination: &str,
        kill_consumer: bool,
    ) -> Result<()> {
        let body = serde_json::to_string_pretty(&profile.identity_json())?;
        info!(destination, model = %profile.model, "applying profile");

        transport.push_as_root(body.as_bytes(), destination)?;

        if kill_consumer {
            if let Err(e) = transport.kill_process(device::DROIDGUARD_PROCESS) {
                warn!(error = %e, "profile applied but consumer process kill failed");
                return Err(e);
            }
        }
        Ok(())
    }
}
