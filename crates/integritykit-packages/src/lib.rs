// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Installer-attribution database handling: the parsed read-modify-write
// model, the transport-facing patcher with its mandatory-backup protocol,
// and the clean-reinstall flow.

pub mod database;
pub mod patcher;
pub mod reinstall;

pub use database::{DatabaseSummary, PackageDb, PackageFilter, PackageRecord, PatchTarget};
pub use patcher::PackagesPatcher;
