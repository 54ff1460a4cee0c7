// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pull/push sync of the TEE-module text configs and the generic
// pull-modify-push helper the rule editors run through.
//
// Sync is deliberately forgiving: a file missing on one side is skipped
// with a warning, never an error; a fresh device has neither file yet.

use integritykit_adb::DeviceTransport;
use integritykit_core::config::{Paths, device};
use integritykit_core::error::{IntegrityError, Result};
use tracing::{info, warn};

/// Files mirrored between the device and the local sync directory.
pub const FILES_TO_SYNC: [&str; 2] = ["target.txt", "security_patch.txt"];

/// Pull device configs into the local sync directory. Returns the names
/// actually pulled; files absent on the device are skipped.
pub fn pull_configs(transport: &dyn DeviceTransport, paths: &Paths) -> Result<Vec<String>> {
    let dir = paths.device_configs_dir();
    let mut pulled = Vec::new();
    for name in FILES_TO_SYNC {
        let remote = format!("{}/{name}", device::TEE_BASE_DIR);
        match transport.pull_as_root(&remote) {
            Ok(bytes) => {
                std::fs::write(dir.join(name), &bytes)?;
                info!(name, "pulled");
                pulled.push(name.to_owned());
            }
            Err(IntegrityError::NotFound(_)) => {
                warn!(name, "not on device, skipping");
            }
            Err(other) => return Err(other),
        }
    }
    Ok(pulled)
}

/// Push local config copies back to the device. Returns the names pushed;
/// files absent locally are skipped.
pub fn push_configs(transport: &dyn DeviceTransport, paths: &Paths) -> Result<Vec<String>> {
    let dir = paths.device_configs_dir();
    let mut pushed = Vec::new();
    for name in FILES_TO_SYNC {
        let local = dir.join(name);
        if !local.exists() {
            warn!(name, "no local copy, skipping");
            continue;
        }
        let bytes = std::fs::read(&local)?;
        let remote = format!("{}/{name}", device::TEE_BASE_DIR);
        transport.push_as_root(&bytes, &remote)?;
        info!(name, "pushed");
        pushed.push(name.to_owned());
    }
    Ok(pushed)
}

/// Pull a remote text file, run a pure modification on its content, and
/// push the result back, but only when the content actually changed.
///
/// A missing remote file starts from empty content. The modification
/// returns `None` to signal "no change" (e.g. removing a rule that is not
/// there), which is a successful no-op, not an error.
pub fn modify_remote_text_file(
    transport: &dyn DeviceTransport,
    remote_path: &str,
    modify: impl FnOnce(&str) -> Option<String>,
) -> Result<bool> {
    let original = match transport.pull_as_root(remote_path) {
        Ok(bytes) => String::from_utf8(bytes).map_err(|_| {
            IntegrityError::ValidationFailed {
                item: remote_path.to_owned(),
                reason: "remote config file is not UTF-8 text".into(),
            }
        })?,
        Err(IntegrityError::NotFound(_)) => {
            info!(remote_path, "remote file absent, starting empty");
            String::new()
        }
        Err(other) => return Err(other),
    };

    let Some(modified) = modify(&original) else {
        info!(remote_path, "content unchanged, nothing to push");
        return Ok(false);
    };
    if modified == original {
        info!(remote_path, "content unchanged, nothing to push");
        return Ok(false);
    }

    transport.push_as_root(modified.as_bytes(), remote_path)?;
    info!(remote_path, "modified file pushed");
    Ok(true)
}
