// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command handlers, one module per command group.

pub mod packages;
pub mod pif;
pub mod system;
pub mod tee;

use integritykit_adb::AdbTransport;
use integritykit_adb::retry::{RetryConfig, establish};
use integritykit_core::error::Result;

/// Connect to the device, retrying while it is still authorizing or
/// coming online. Commands that never touch the device skip this.
pub fn connect() -> Result<AdbTransport> {
    let transport = AdbTransport::new();
    establish(&RetryConfig::default(), || transport.ensure_device())?;
    Ok(transport)
}
