// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transport trait for talking to the device.
//
// The trait exposes the primitives the rest of the tool is written
// against (whole-file pull/push, shell execution, process control) plus
// the root-staging protocol layered on top of them: root-protected files
// are copied into the world-readable staging directory before a pull,
// and pushed files land in staging and are moved into place with root.
// The final `mv` happens on the device's own filesystem, so the visible
// replacement is atomic even if the cable drops mid-transfer.

use integritykit_core::config::device;
use integritykit_core::error::{IntegrityError, Result};
use tracing::{debug, info, warn};

/// Result of a device-side shell command.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub stdout: String,
    pub exit_code: i32,
}

impl ShellOutput {
    pub fn ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// Blocking transport to a single connected device.
///
/// All calls fail with `IntegrityError::Transport` when the device is
/// disconnected or unauthorized.
pub trait DeviceTransport {
    /// Read a world-readable remote file into memory.
    fn pull(&self, remote_path: &str) -> Result<Vec<u8>>;

    /// Write bytes to a world-writable remote path.
    fn push(&self, bytes: &[u8], remote_path: &str) -> Result<()>;

    /// Run a shell command on the device (non-root).
    fn run_shell(&self, command: &str) -> Result<ShellOutput>;

    /// Full power-cycle reboot.
    fn full_reboot(&self) -> Result<()> {
        self.run_shell("reboot")?;
        Ok(())
    }

    /// Run a command as root and return trimmed stdout. Non-zero exit is
    /// an error carrying the command's output.
    fn shell_su(&self, command: &str) -> Result<String> {
        debug!(command, "root shell");
        let out = self.run_shell(&format!("su -c '{command}'"))?;
        if !out.ok() {
            return Err(IntegrityError::Transport(format!(
                "root command '{command}' failed with exit code {}: {}",
                out.exit_code,
                out.stdout.trim()
            )));
        }
        Ok(out.stdout.trim().to_owned())
    }

    /// Restart the UI-owning process without a full power cycle.
    fn soft_reboot(&self) -> Result<()> {
        info!("soft reboot: killing system_server");
        self.shell_su("killall system_server")?;
        Ok(())
    }

    /// Kill every PID of the named process. Missing process is not an
    /// error: the goal state, process not running, already holds.
    fn kill_process(&self, name: &str) -> Result<()> {
        let pids = self.shell_su(&format!("pidof {name}")).unwrap_or_default();
        if pids.is_empty() {
            warn!(process = name, "process not running, nothing to kill");
            return Ok(());
        }
        for pid in pids.split_whitespace() {
            debug!(pid, "sending SIGKILL");
            self.shell_su(&format!("kill -9 {pid}"))?;
        }
        info!(process = name, "kill signal sent");
        Ok(())
    }

    /// Pull a root-protected file by staging a world-readable copy first.
    ///
    /// Maps a missing remote file to `NotFound` so callers can distinguish
    /// "file absent" from "device unreachable".
    fn pull_as_root(&self, remote_path: &str) -> Result<Vec<u8>> {
        let staged = format!("{}/tmp_pull_{}", device::STAGING_DIR, staging_suffix());
        info!(remote_path, "pulling root-protected file");

        let result = (|| {
            self.shell_su(&format!("cp {remote_path} {staged}")).map_err(|e| {
                if e.to_string().contains("No such file") {
                    IntegrityError::NotFound(format!("remote file {remote_path}"))
                } else {
                    e
                }
            })?;
            self.shell_su(&format!("chown shell:shell {staged}"))?;
            self.shell_su(&format!("chmod 644 {staged}"))?;
            self.pull(&staged)
        })();

        // Clean up staging regardless of outcome.
        let _ = self.run_shell(&format!("rm -f {staged}"));
        result
    }

    /// Push bytes into a root-protected destination: land them in staging,
    /// then move into place with root and fix the mode.
    fn push_as_root(&self, bytes: &[u8], final_destination: &str) -> Result<()> {
        let basename = final_destination.rsplit('/').next().unwrap_or("file");
        let staged = format!("{}/{}.{}", device::STAGING_DIR, basename, staging_suffix());

        info!(final_destination, len = bytes.len(), "pushing via staging");
        self.push(bytes, &staged)?;
        self.shell_su(&format!("mv {staged} {final_destination}"))?;
        self.shell_su(&format!("chmod 644 {final_destination}"))?;
        debug!(final_destination, "push complete");
        Ok(())
    }
}

/// Collision-avoiding suffix for staged device paths.
///
/// Derived from the wall clock rather than a PRNG; one operation runs at
/// a time, so uniqueness across concurrent invocations is not required.
pub(crate) fn staging_suffix() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{secs}_{nanos:08}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubTransport;

    #[test]
    fn shell_su_propagates_failure() {
        let t = StubTransport::new();
        let err = t.shell_su("cat /nonexistent").unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn pull_as_root_missing_file_is_not_found() {
        let t = StubTransport::new();
        let err = t.pull_as_root("/data/system/absent.xml").unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[test]
    fn push_as_root_lands_at_destination() {
        let t = StubTransport::new();
        t.push_as_root(b"hello", "/data/adb/tricky_store/keybox.xml")
            .unwrap();
        assert_eq!(
            t.file_contents("/data/adb/tricky_store/keybox.xml").unwrap(),
            b"hello"
        );
        // Nothing left behind in staging.
        assert!(t.files_under("/data/local/tmp").is_empty());
    }

    #[test]
    fn kill_process_tolerates_absent_process() {
        let t = StubTransport::new();
        assert!(t.kill_process("com.example.ghost").is_ok());
    }
}
