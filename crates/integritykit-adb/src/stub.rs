// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory stub transport.
//
// Emulates the slice of device behavior the tool actually exercises: a
// path-keyed filesystem, a process table, system properties, and the
// handful of shell commands the transport layer issues. Tests drive the
// same code paths as the real ADB client, including the root-staging
// protocol.

use std::collections::BTreeMap;
use std::sync::Mutex;

use integritykit_core::error::{IntegrityError, Result};

use crate::traits::{DeviceTransport, ShellOutput};

#[derive(Default)]
struct DeviceState {
    files: BTreeMap<String, Vec<u8>>,
    processes: BTreeMap<String, Vec<u32>>,
    props: BTreeMap<String, String>,
    scripted: BTreeMap<String, ShellOutput>,
    soft_rebooted: bool,
    full_rebooted: bool,
    fail_pushes: bool,
}

/// Stub device backed by in-memory state.
pub struct StubTransport {
    state: Mutex<DeviceState>,
}

impl Default for StubTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StubTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Seed a file on the stub device.
    pub fn set_file(&self, path: &str, contents: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_owned(), contents.to_vec());
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn files_under(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.state
            .lock()
            .unwrap()
            .files
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Seed a running process.
    pub fn add_process(&self, name: &str, pids: &[u32]) {
        self.state
            .lock()
            .unwrap()
            .processes
            .insert(name.to_owned(), pids.to_vec());
    }

    pub fn process_running(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .processes
            .get(name)
            .is_some_and(|pids| !pids.is_empty())
    }

    pub fn prop(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().props.get(key).cloned()
    }

    /// Script an exact shell command to a fixed response.
    pub fn script(&self, command: &str, stdout: &str, exit_code: i32) {
        self.state.lock().unwrap().scripted.insert(
            command.to_owned(),
            ShellOutput {
                stdout: stdout.to_owned(),
                exit_code,
            },
        );
    }

    /// Make every subsequent `push` fail with a transport error.
    pub fn fail_pushes(&self, fail: bool) {
        self.state.lock().unwrap().fail_pushes = fail;
    }

    pub fn was_soft_rebooted(&self) -> bool {
        self.state.lock().unwrap().soft_rebooted
    }

    pub fn was_full_rebooted(&self) -> bool {
        self.state.lock().unwrap().full_rebooted
    }

    fn exec(state: &mut DeviceState, command: &str) -> ShellOutput {
        if let Some(out) = state.scripted.get(command) {
            return out.clone();
        }

        // Unwrap the root wrapper; the stub treats everything as root.
        let command = command
            .strip_prefix("su -c '")
            .and_then(|c| c.strip_suffix('\''))
            .unwrap_or(command)
            .trim();

        let argv: Vec<&str> = command.split_whitespace().collect();
        match argv.as_slice() {
            ["cp", src, dst] => match state.files.get(*src).cloned() {
                Some(bytes) => {
                    state.files.insert((*dst).to_owned(), bytes);
                    ok("")
                }
                None => fail(&format!("cp: {src}: No such file or directory")),
            },
            ["mv", src, dst] => match state.files.remove(*src) {
                Some(bytes) => {
                    state.files.insert((*dst).to_owned(), bytes);
                    ok("")
                }
                None => fail(&format!("mv: {src}: No such file or directory")),
            },
            ["rm", "-f", patterns @ ..] => {
                for pattern in patterns {
                    let pattern = pattern.trim_matches('"');
                    if let Some(prefix) = pattern.strip_suffix('*') {
                        state.files.retain(|p, _| !p.starts_with(prefix));
                    } else {
                        state.files.remove(pattern);
                    }
                }
                ok("")
            }
            ["cat", path] => match state.files.get(*path) {
                Some(bytes) => ok(&String::from_utf8_lossy(bytes)),
                None => fail(&format!("cat: {path}: No such file or directory")),
            },
            ["chmod", ..] | ["chown", ..] | ["restorecon", ..] => ok(""),
            ["command", "-v", ..] => ok(""),
            ["pidof", name] => match state.processes.get(*name) {
                Some(pids) if !pids.is_empty() => {
                    let joined: Vec<String> = pids.iter().map(u32::to_string).collect();
                    ok(&joined.join(" "))
                }
                _ => fail(""),
            },
            ["kill", "-9", pid] => {
                let pid: u32 = pid.parse().unwrap_or(0);
                for pids in state.processes.values_mut() {
                    pids.retain(|p| *p != pid);
                }
                ok("")
            }
            ["killall", name] => {
                if *name == "system_server" {
                    state.soft_rebooted = true;
                }
                state.processes.remove(*name);
                ok("")
            }
            ["reboot"] => {
                state.full_rebooted = true;
                ok("")
            }
            ["resetprop", key, value] => {
                state.props.insert((*key).to_owned(), (*value).to_owned());
                ok("")
            }
            ["find", dir, "-maxdepth", "1", "-name", pattern] => {
                let prefix = format!("{}/", dir.trim_end_matches('/'));
                let suffix = pattern.trim_matches('\'').trim_start_matches('*');
                let hits: Vec<&String> = state
                    .files
                    .keys()
                    .filter(|p| p.starts_with(&prefix) && p.ends_with(suffix))
                    .filter(|p| !p[prefix.len()..].contains('/'))
                    .collect();
                ok(&hits
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
            ["[", "-f", path, "]"] => {
                if state.files.contains_key(*path) {
                    ok("")
                } else {
                    fail("")
                }
            }
            _ => fail(&format!("sh: {}: command not found", argv.first().unwrap_or(&""))),
        }
    }
}

fn ok(stdout: &str) -> ShellOutput {
    ShellOutput {
        stdout: stdout.to_owned(),
        exit_code: 0,
    }
}

fn fail(stdout: &str) -> ShellOutput {
    ShellOutput {
        stdout: stdout.to_owned(),
        exit_code: 1,
    }
}

impl DeviceTransport for StubTransport {
    fn pull(&self, remote_path: &str) -> Result<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(remote_path)
            .cloned()
            .ok_or_else(|| {
                IntegrityError::Transport(format!("pull {remote_path}: No such file or directory"))
            })
    }

    fn push(&self, bytes: &[u8], remote_path: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_pushes {
            return Err(IntegrityError::Transport("push failed: device offline".into()));
        }
        state.files.insert(remote_path.to_owned(), bytes.to_vec());
        Ok(())
    }

    fn run_shell(&self, command: &str) -> Result<ShellOutput> {
        let mut state = self.state.lock().unwrap();
        Ok(Self::exec(&mut state, command))
    }
}
