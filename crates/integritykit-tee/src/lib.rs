// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// TEE-module configuration: pull/push sync of the device's rule files and
// line-preserving structured edits on them.

pub mod patch_level;
pub mod sync;
pub mod target;

pub use sync::{modify_remote_text_file, pull_configs, push_configs};
pub use target::{TargetEntry, TargetMode};
