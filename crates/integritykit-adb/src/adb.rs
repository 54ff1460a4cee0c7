// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ADB subprocess transport.
//
// Shells out to the `adb` binary on PATH. File transfers round-trip
// through a local temporary directory because `adb pull`/`adb push` only
// speak paths, not pipes.

use std::process::Command;

use integritykit_core::error::{IntegrityError, Result};
use tracing::{debug, info};

use crate::traits::{DeviceTransport, ShellOutput};

/// Transport backed by the `adb` command-line client.
pub struct AdbTransport {
    program: String,
}

impl Default for AdbTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl AdbTransport {
    pub fn new() -> Self {
        Self {
            program: "adb".to_owned(),
        }
    }

    /// Use an explicit adb binary (tests, nonstandard installs).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run_adb(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(?args, "adb");
        Command::new(&self.program).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IntegrityError::Transport(
                    "adb command not found — is the platform-tools package on PATH?".into(),
                )
            } else {
                IntegrityError::Transport(format!("failed to spawn adb: {e}"))
            }
        })
    }

    fn run_adb_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run_adb(args)?;
        if !output.status.success() {
            return Err(IntegrityError::Transport(format!(
                "adb {} failed with exit code {}: {}",
                args.join(" "),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Verify that exactly one ready device is reachable and return its
    /// serial. Unauthorized and offline states are reported distinctly so
    /// the retry policy can treat them as transient.
    pub fn ensure_device(&self) -> Result<String> {
        let stdout = self.run_adb_checked(&["devices"])?;
        let mut seen_not_ready = false;

        // First line is the "List of devices attached" header.
        for line in stdout.lines().skip(1) {
            let mut cols = line.split_whitespace();
            let (Some(serial), Some(state)) = (cols.next(), cols.next()) else {
                continue;
            };
            match state {
                "device" => {
                    info!(serial, "device connected");
                    return Ok(serial.to_owned());
                }
                "unauthorized" | "offline" => seen_not_ready = true,
                _ => {}
            }
        }

        if seen_not_ready {
            Err(IntegrityError::Transport(
                "a device is connected but unauthorized or offline".into(),
            ))
        } else {
            Err(IntegrityError::Transport(
                "no devices found — connect a device and authorize this host".into(),
            ))
        }
    }
}

impl DeviceTransport for AdbTransport {
    fn pull(&self, remote_path: &str) -> Result<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let local = dir.path().join("pulled");
        let local_str = local.to_string_lossy().into_owned();

        info!(remote_path, "adb pull");
        self.run_adb_checked(&["pull", remote_path, &local_str])?;
        Ok(std::fs::read(&local)?)
    }

    fn push(&self, bytes: &[u8], remote_path: &str) -> Result<()> {
        let dir = tempfile::tempdir()?;
        let local = dir.path().join("pushed");
        std::fs::write(&local, bytes)?;
        let local_str = local.to_string_lossy().into_owned();

        info!(remote_path, len = bytes.len(), "adb push");
        self.run_adb_checked(&["push", &local_str, remote_path])?;
        Ok(())
    }

    fn run_shell(&self, command: &str) -> Result<ShellOutput> {
        let output = self.run_adb(&["shell", command])?;
        Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn full_reboot(&self) -> Result<()> {
        info!("full reboot requested");
        self.run_adb_checked(&["reboot"])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_transport_error() {
        let t = AdbTransport::with_program("definitely-not-adb-on-path");
        let err = t.ensure_device().unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert!(err.to_string().contains("adb"));
    }
}
