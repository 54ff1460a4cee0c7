// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for IntegrityKit.

use thiserror::Error;

/// Top-level error type for all IntegrityKit operations.
#[derive(Debug, Error)]
pub enum IntegrityError {
    // -- Device transport --
    #[error("device transport error: {0}")]
    Transport(String),

    // -- Local caches --
    #[error("cache file {path} is corrupt: {detail}")]
    CacheCorrupt { path: String, detail: String },

    // -- Credential validation --
    #[error("validation failed for '{item}': {reason}")]
    ValidationFailed { item: String, reason: String },

    // -- Missing identifiers --
    #[error("backup #{sequence} not found (available: {available})")]
    BackupNotFound { sequence: u64, available: String },

    #[error("keybox '{key}' not in local cache (cached: {available})")]
    UnknownKey { key: String, available: String },

    #[error("{0} not found")]
    NotFound(String),

    // -- Device database --
    #[error("failed to parse device database: {0}")]
    ParseError(String),

    // -- Remote sources --
    #[error("remote fetch failed: {0}")]
    FetchFailed(String),

    // -- Ambient --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IntegrityError {
    /// Stable machine-readable tag for this error, printed by the CLI on
    /// failure so callers can distinguish error classes without parsing
    /// the human message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::CacheCorrupt { .. } => "cache-corrupt",
            Self::ValidationFailed { .. } => "validation-failed",
            Self::BackupNotFound { .. } => "backup-not-found",
            Self::UnknownKey { .. } => "unknown-key",
            Self::NotFound(_) => "not-found",
            Self::ParseError(_) => "parse-error",
            Self::FetchFailed(_) => "fetch-failed",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, IntegrityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        let err = IntegrityError::Transport("offline".into());
        assert_eq!(err.kind(), "transport");

        let err = IntegrityError::BackupNotFound {
            sequence: 7,
            available: "1, 2, 3".into(),
        };
        assert_eq!(err.kind(), "backup-not-found");
        assert!(err.to_string().contains("#7"));
    }

    #[test]
    fn io_errors_convert() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert_eq!(fails().unwrap_err().kind(), "io");
    }
}
