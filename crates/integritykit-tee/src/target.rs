// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Structured edits on the target-rules file.
//
// Format: one package per line with an optional mode suffix (`!` generate,
// `?` patch, none auto). A `[keybox.xml]` header switches the keybox
// context for the lines after it; lines before the first header use the
// default keybox. Edits touch only the lines they must; comments, blank
// lines, and unrelated rules pass through verbatim.

use std::sync::OnceLock;

use regex::Regex;

/// Certificate handling mode for a targeted package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Leave mode selection to the module.
    Auto,
    /// Generate a certificate chain.
    Generate,
    /// Patch the leaf certificate.
    Patch,
}

impl TargetMode {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Auto => "",
            Self::Generate => "!",
            Self::Patch => "?",
        }
    }

    fn from_suffix(suffix: Option<&str>) -> Self {
        match suffix {
            Some("!") => Self::Generate,
            Some("?") => Self::Patch,
            _ => Self::Auto,
        }
    }
}

/// One interpreted rule line, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntry {
    pub package: String,
    pub mode: TargetMode,
    /// Keybox file the rule resolves to; `None` means the default keybox.
    pub keybox: Option<String>,
}

fn rule_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([\w.\-]+)([!?])?$").unwrap())
}

fn section_header(line: &str) -> Option<&str> {
    let line = line.trim();
    line.strip_prefix('[')?.strip_suffix(']')
}

/// Parse the file into interpreted entries (for `--show`).
pub fn interpret(content: &str) -> Vec<TargetEntry> {
    let mut entries = Vec::new();
    let mut current_keybox: Option<String> = None;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = section_header(line) {
            current_keybox = Some(name.to_owned());
            continue;
        }
        if let Some(caps) = rule_line_re().captures(line) {
            entries.push(TargetEntry {
                package: caps[1].to_owned(),
                mode: TargetMode::from_suffix(caps.get(2).map(|m| m.as_str())),
                keybox: current_keybox.clone(),
            });
        }
    }
    entries
}

/// Remove any existing rule line for `package`, wherever it sits.
fn strip_package(lines: &mut Vec<String>, package: &str) -> bool {
    let before = lines.len();
    lines.retain(|line| {
        rule_line_re()
            .captures(line.trim())
            .is_none_or(|caps| &caps[1] != package)
    });
    lines.len() != before
}

/// Add or update the rule for `package`. An existing rule is replaced, not
/// duplicated; one rule per package. Without a keybox section the rule
/// goes to the top (default-keybox scope); with one it lands under that
/// section, creating the section at the end of the file if absent.
pub fn add_rule(
    content: &str,
    package: &str,
    mode: TargetMode,
    keybox_section: Option<&str>,
) -> Option<String> {
    let mut lines: Vec<String> = content.lines().map(str::to_owned).collect();
    strip_package(&mut lines, package);

    let new_line = format!("{package}{}", mode.suffix());
    match keybox_section {
        None => lines.insert(0, new_line),
        Some(section) => {
            let header = format!("[{section}]");
            match lines.iter().position(|l| l.trim() == header) {
                Some(index) => lines.insert(index + 1, new_line),
                None => {
                    if lines.last().is_some_and(|l| !l.is_empty()) {
                        lines.push(String::new());
                    }
                    lines.push(header);
                    lines.push(new_line);
                }
            }
        }
    }

    Some(join_lines(lines))
}

/// Remove the rule for `package`. Returns `None` when no rule exists;
/// the caller treats that as a successful no-op.
pub fn remove_rule(content: &str, package: &str) -> Option<String> {
    let mut lines: Vec<String> = content.lines().map(str::to_owned).collect();
    if !strip_package(&mut lines, package) {
        return None;
    }
    Some(join_lines(lines))
}

fn join_lines(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}
