// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Structured edits on the patch-level override file.
//
// Format: `key=value` lines. Lines before the first `[package]` header
// form the global scope and apply to every package; a `[package]` section
// overrides the global value for the same key. That precedence is also
// implemented here (`effective_value`) so read-side consumers resolve it
// identically.

/// Keys the module understands.
pub const PATCH_KEYS: [&str; 4] = ["all", "system", "vendor", "boot"];

/// Span of a scope's lines: [start, end) line indices, header excluded.
fn scope_span(lines: &[String], package: Option<&str>) -> Option<(usize, usize)> {
    match package {
        None => {
            let end = lines
                .iter()
                .position(|l| is_header(l))
                .unwrap_or(lines.len());
            Some((0, end))
        }
        Some(package) => {
            let header = format!("[{package}]");
            let start = lines.iter().position(|l| l.trim() == header)? + 1;
            let end = lines[start..]
                .iter()
                .position(|l| is_header(l))
                .map_or(lines.len(), |off| start + off);
            Some((start, end))
        }
    }
}

fn is_header(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('[') && line.ends_with(']')
}

fn key_of(line: &str) -> Option<&str> {
    line.trim().split_once('=').map(|(k, _)| k.trim())
}

/// Set `key=value` in the global scope (`package: None`) or a package
/// scope. An existing key in that scope is updated in place; a missing
/// package section is created at the end of the file. Unrelated lines are
/// never rewritten.
pub fn set_value(content: &str, package: Option<&str>, key: &str, value: &str) -> Option<String> {
    let mut lines: Vec<String> = content.lines().map(str::to_owned).collect();
    let new_line = format!("{key}={value}");

    match scope_span(&lines, package) {
        Some((start, end)) => {
            if let Some(index) = (start..end).find(|&i| key_of(&lines[i]) == Some(key)) {
                if lines[index].trim() == new_line {
                    return None;
                }
                lines[index] = new_line;
            } else {
                lines.insert(end, new_line);
            }
        }
        None => {
            // Package section absent: create it at EOF.
            let package = package.expect("global scope always resolves");
            if lines.last().is_some_and(|l| !l.is_empty()) {
                lines.push(String::new());
            }
            lines.push(format!("[{package}]"));
            lines.push(new_line);
        }
    }

    Some(join_lines(lines))
}

/// Remove a package's entire section. `None` when the section does not
/// exist (successful no-op).
pub fn remove_section(content: &str, package: &str) -> Option<String> {
    let lines: Vec<String> = content.lines().map(str::to_owned).collect();
    let header = format!("[{package}]");
    let start = lines.iter().position(|l| l.trim() == header)?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| is_header(l))
        .map_or(lines.len(), |off| start + 1 + off);

    let mut kept: Vec<String> = Vec::with_capacity(lines.len());
    kept.extend_from_slice(&lines[..start]);
    kept.extend_from_slice(&lines[end..]);
    // Drop a trailing blank the removed section left behind.
    while kept.last().is_some_and(|l| l.trim().is_empty()) {
        kept.pop();
    }
    Some(join_lines(kept))
}

/// Resolve the value of `key` as seen by `package`: a package-scope entry
/// wins over the global one.
pub fn effective_value(content: &str, package: &str, key: &str) -> Option<String> {
    let lines: Vec<String> = content.lines().map(str::to_owned).collect();

    let lookup = |span: (usize, usize)| {
        (span.0..span.1).find_map(|i| {
            let line = lines[i].trim();
            let (k, v) = line.split_once('=')?;
            (k.trim() == key).then(|| v.trim().to_owned())
        })
    };

    if let Some(span) = scope_span(&lines, Some(package)) {
        if let Some(value) = lookup(span) {
            return Some(value);
        }
    }
    scope_span(&lines, None).and_then(lookup)
}

fn join_lines(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# module defaults
all=2025-10-05
system=2025-10-05

[com.example]
system=2025-11-01

[com.other]
boot=no
";

    #[test]
    fn package_scope_overrides_global() {
        assert_eq!(
            effective_value(SAMPLE, "com.example", "system").as_deref(),
            Some("2025-11-01")
        );
        assert_eq!(
            effective_value(SAMPLE, "com.unrelated", "system").as_deref(),
            Some("2025-10-05")
        );
    }

    #[test]
    fn global_value_applies_when_scope_lacks_key() {
        // com.other has no `system` entry; the global wins.
        assert_eq!(
            effective_value(SAMPLE, "com.other", "system").as_deref(),
            Some("2025-10-05")
        );
        assert_eq!(effective_value(SAMPLE, "com.other", "boot").as_deref(), Some("no"));
    }

    #[test]
    fn set_global_updates_in_place() {
        let out = set_value(SAMPLE, None, "all", "2025-12-05").unwrap();
        assert!(out.contains("all=2025-12-05"));
        assert!(!out.contains("all=2025-10-05"));
        // Comment and sections untouched.
        assert!(out.contains("# module defaults"));
        assert!(out.contains("[com.other]"));
    }

    #[test]
    fn set_global_never_leaks_into_a_section() {
        let out = set_value(SAMPLE, None, "vendor", "2025-10-05").unwrap();
        // New global key lands before the first section header.
        let vendor_pos = out.find("vendor=").unwrap();
        let header_pos = out.find("[com.example]").unwrap();
        assert!(vendor_pos < header_pos);
    }

    #[test]
    fn set_package_updates_only_that_section() {
        let out = set_value(SAMPLE, Some("com.example"), "system", "2026-01-05").unwrap();
        assert!(out.contains("[com.example]\nsystem=2026-01-05"));
        // Global entry unchanged.
        assert!(out.contains("system=2025-10-05"));
    }

    #[test]
    fn set_creates_missing_section_at_end() {
        let out = set_value(SAMPLE, Some("com.new"), "all", "no").unwrap();
        assert!(out.ends_with("[com.new]\nall=no\n"));
        assert_eq!(effective_value(&out, "com.new", "all").as_deref(), Some("no"));
    }

    #[test]
    fn set_identical_value_is_a_no_op() {
        assert!(set_value(SAMPLE, None, "all", "2025-10-05").is_none());
    }

    #[test]
    fn remove_section_keeps_neighbours() {
        let out = remove_section(SAMPLE, "com.example").unwrap();
        assert!(!out.contains("[com.example]"));
        assert!(!out.contains("2025-11-01"));
        assert!(out.contains("[com.other]\nboot=no"));
        assert!(out.contains("all=2025-10-05"));
    }

    #[test]
    fn remove_missing_section_is_a_no_op() {
        assert!(remove_section(SAMPLE, "com.ghost").is_none());
    }

    #[test]
    fn set_on_empty_file() {
        let out = set_value("", None, "all", "2025-10-05").unwrap();
        assert_eq!(out, "all=2025-10-05\n");

        let out = set_value("", Some("com.example"), "boot", "no").unwrap();
        assert_eq!(out, "[com.example]\nboot=no\n");
    }
}
