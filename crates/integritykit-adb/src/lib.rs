// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device transport layer: the `DeviceTransport` trait, the real ADB
// subprocess implementation, an in-memory stub for tests, and the
// bounded-retry policy for connection establishment.

pub mod adb;
pub mod retry;
pub mod stub;
pub mod traits;

pub use adb::AdbTransport;
pub use stub::StubTransport;
pub use traits::{DeviceTransport, ShellOutput};
