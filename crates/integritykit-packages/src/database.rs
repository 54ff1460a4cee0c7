// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Parsed model of the installer-attribution database.
//
// The database is the package manager's own file; nothing this tool does
// may ever leave it in a form the device cannot re-read. Records are
// parsed from the opening `<package ...>` tags only, each remembering the
// byte span of its tag in the source document. Rendering splices rebuilt
// tags for modified records back into the original text, so every byte
// the patcher did not touch (child elements, whitespace, unrelated
// sections) round-trips verbatim.

use std::sync::OnceLock;

use integritykit_core::config::device;
use integritykit_core::error::{IntegrityError, Result};
use regex::Regex;
use tracing::debug;

/// Attributes the patcher manages on a package element.
const ATTR_INSTALLER: &str = "installer";
const ATTR_INSTALL_INITIATOR: &str = "installInitiator";
const ATTR_INSTALLER_UID: &str = "installerUid";
const ATTR_PACKAGE_SOURCE: &str = "packageSource";
const ATTR_INSTALL_ORIGINATOR: &str = "installOriginator";
const ATTR_IS_ORPHANED: &str = "isOrphaned";
const ATTR_INITIATOR_UNINSTALLED: &str = "installInitiatorUninstalled";

fn package_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<package\b[^>]*>").unwrap())
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([A-Za-z_][\w.:-]*)\s*=\s*"([^"]*)""#).unwrap())
}

fn version_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<version\b[^>]*>").unwrap())
}

/// One installed application's row.
#[derive(Debug, Clone)]
pub struct PackageRecord {
    /// Attributes of the opening tag, in document order. Values are kept
    /// exactly as they appear in the source (no unescaping).
    attrs: Vec<(String, String)>,
    /// Byte span of the opening tag in the source document.
    tag_span: (usize, usize),
    self_closing: bool,
    dirty: bool,
}

impl PackageRecord {
    pub fn name(&self) -> &str {
        self.attr("name").unwrap_or("")
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn installer(&self) -> Option<&str> {
        self.attr(ATTR_INSTALLER)
    }

    pub fn code_path(&self) -> &str {
        self.attr("codePath").unwrap_or("")
    }

    /// System apps live outside `/data/app`.
    pub fn is_system_app(&self) -> bool {
        !self.code_path().starts_with("/data/app")
    }

    pub fn package_source(&self) -> Option<&str> {
        self.attr(ATTR_PACKAGE_SOURCE)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.attr("userId")
    }

    /// Set an attribute; returns true when the value actually changed.
    fn set_attr(&mut self, key: &str, value: &str) -> bool {
        if let Some((_, v)) = self.attrs.iter_mut().find(|(k, _)| k == key) {
            if v == value {
                return false;
            }
            *v = value.to_owned();
        } else {
            self.attrs.push((key.to_owned(), value.to_owned()));
        }
        self.dirty = true;
        true
    }

    /// Remove an attribute; returns true when it was present.
    fn remove_attr(&mut self, key: &str) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|(k, _)| k != key);
        if self.attrs.len() != before {
            self.dirty = true;
            true
        } else {
            false
        }
    }

    fn rebuilt_tag(&self) -> String {
        let mut tag = String::from("<package");
        for (k, v) in &self.attrs {
            tag.push(' ');
            tag.push_str(k);
            tag.push_str("=\"");
            tag.push_str(v);
            tag.push('"');
        }
        tag.push_str(if self.self_closing { " />" } else { ">" });
        tag
    }
}

/// Which records a patch or listing applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageFilter {
    /// Default "smart patch" scope: non-system records whose installer is
    /// absent or not the canonical Play Store id.
    Sideloaded,
    /// Everything in the database.
    All,
    /// User-installed (under `/data/app`).
    User,
    /// System-image packages.
    System,
    /// Records with no installer attribute at all.
    NoInstaller,
    /// One package by name.
    Single(String),
}

/// Desired installer attribution for a patch.
#[derive(Debug, Clone)]
pub enum PatchTarget {
    /// Attribute the install to this package, with this `packageSource`
    /// value ("0" unspecified, "2" store).
    Installer {
        package: String,
        package_source: String,
    },
    /// Strip attribution entirely.
    RemoveOrigin,
}

impl PatchTarget {
    pub fn play_store() -> Self {
        Self::Installer {
            package: device::PLAY_STORE_PACKAGE.to_owned(),
            package_source: "0".to_owned(),
        }
    }
}

/// High-level view of a database for `packages info --summary`.
#[derive(Debug)]
pub struct DatabaseSummary {
    pub total: usize,
    pub sdk_version: Option<String>,
    pub fingerprint: Option<String>,
    /// (installer id or "None", count), most common first.
    pub installer_counts: Vec<(String, usize)>,
}

/// The parsed database: source text plus the record index over it.
#[derive(Debug)]
pub struct PackageDb {
    text: String,
    records: Vec<PackageRecord>,
}

impl PackageDb {
    /// Parse the pulled database text. Any structural surprise is a
    /// `ParseError`; a parse failure must abort the invoking command
    /// before any write is attempted.
    pub fn parse(text: &str) -> Result<Self> {
        if !text.contains("<packages") {
            return Err(IntegrityError::ParseError(
                "document has no <packages> root element".into(),
            ));
        }

        let mut records = Vec::new();
        for m in package_tag_re().find_iter(text) {
            let tag = m.as_str();
            let attrs: Vec<(String, String)> = attr_re()
                .captures_iter(tag)
                .map(|c| (c[1].to_owned(), c[2].to_owned()))
                .collect();

            if !attrs.iter().any(|(k, _)| k == "name") {
                return Err(IntegrityError::ParseError(format!(
                    "package element at byte {} has no name attribute",
                    m.start()
                )));
            }

            records.push(PackageRecord {
                attrs,
                tag_span: (m.start(), m.end()),
                self_closing: tag.trim_end_matches('>').ends_with('/'),
                dirty: false,
            });
        }

        debug!(records = records.len(), "database parsed");
        Ok(Self {
            text: text.to_owned(),
            records,
        })
    }

    pub fn records(&self) -> &[PackageRecord] {
        &self.records
    }

    pub fn find(&self, name: &str) -> Option<&PackageRecord> {
        self.records.iter().find(|r| r.name() == name)
    }

    /// `sdkVersion` and build fingerprint from the `<version>` element.
    pub fn version_info(&self) -> (Option<String>, Option<String>) {
        let Some(m) = version_tag_re().find(&self.text) else {
            return (None, None);
        };
        let mut sdk = None;
        let mut fingerprint = None;
        for c in attr_re().captures_iter(m.as_str()) {
            match &c[1] {
                "sdkVersion" => sdk = Some(c[2].to_owned()),
                "buildFingerprint" | "fingerprint" => fingerprint = Some(c[2].to_owned()),
                _ => {}
            }
        }
        (sdk, fingerprint)
    }

    /// Indices of the records in `filter` scope, in document order.
    pub fn classify(&self, filter: &PackageFilter) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| match filter {
                PackageFilter::All => true,
                PackageFilter::User => !r.is_system_app(),
                PackageFilter::System => r.is_system_app(),
                PackageFilter::NoInstaller => r.installer().is_none(),
                PackageFilter::Sideloaded => {
                    !r.is_system_app() && r.installer() != Some(device::PLAY_STORE_PACKAGE)
                }
                PackageFilter::Single(name) => r.name() == name,
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Retarget installer attribution for every record in scope.
    ///
    /// Idempotent: a record already carrying the requested attribution is
    /// left untouched and not counted. Returns the number of records
    /// changed. When attributing to a named installer, that installer must
    /// itself exist in the database (its uid is recorded alongside); a
    /// missing target fails before anything is modified.
    pub fn patch(&mut self, filter: &PackageFilter, target: &PatchTarget) -> Result<usize> {
        let scope = self.classify(filter);

        let origin_uid = match target {
            PatchTarget::Installer { package, .. } => {
                let origin = self.find(package).ok_or_else(|| {
                    IntegrityError::NotFound(format!(
                        "installer package '{package}' in the database"
                    ))
                })?;
                origin.user_id().map(str::to_owned)
            }
            PatchTarget::RemoveOrigin => None,
        };

        let mut changed = 0usize;
        for index in scope {
            let record = &mut self.records[index];
            let mut touched = false;

            match target {
                PatchTarget::Installer {
                    package,
                    package_source,
                } => {
                    touched |= record.set_attr(ATTR_INSTALLER, package);
                    touched |= record.set_attr(ATTR_INSTALL_INITIATOR, package);
                    if let Some(uid) = &origin_uid {
                        touched |= record.set_attr(ATTR_INSTALLER_UID, uid);
                    }
                    touched |= record.set_attr(ATTR_PACKAGE_SOURCE, package_source);
                }
                PatchTarget::RemoveOrigin => {
                    touched |= record.remove_attr(ATTR_INSTALLER);
                    touched |= record.remove_attr(ATTR_INSTALL_INITIATOR);
                    touched |= record.remove_attr(ATTR_INSTALLER_UID);
                    if record.package_source() != Some("0") {
                        touched |= record.set_attr(ATTR_PACKAGE_SOURCE, "0");
                    }
                }
            }

            // Stale marks the package manager would trip over after a
            // retarget, in either mode.
            touched |= record.remove_attr(ATTR_INSTALL_ORIGINATOR);
            if record.attr(ATTR_IS_ORPHANED) == Some("true") {
                touched |= record.remove_attr(ATTR_IS_ORPHANED);
            }
            if record.attr(ATTR_INITIATOR_UNINSTALLED) == Some("true") {
                touched |= record.remove_attr(ATTR_INITIATOR_UNINSTALLED);
            }

            if touched {
                debug!(package = record.name(), "record patched");
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Render the full document, splicing rebuilt opening tags for
    /// modified records. Untouched bytes are emitted verbatim.
    pub fn to_document(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut cursor = 0usize;
        for record in &self.records {
            let (start, end) = record.tag_span;
            out.push_str(&self.text[cursor..start]);
            if record.dirty {
                out.push_str(&record.rebuilt_tag());
            } else {
                out.push_str(&self.text[start..end]);
            }
            cursor = end;
        }
        out.push_str(&self.text[cursor..]);
        out
    }

    /// Summary counts for `packages info --summary`.
    pub fn summarize(&self) -> DatabaseSummary {
        let (sdk_version, fingerprint) = self.version_info();

        let mut counts: Vec<(String, usize)> = Vec::new();
        for record in &self.records {
            let installer = record.installer().unwrap_or("None").to_owned();
            match counts.iter_mut().find(|(name, _)| *name == installer) {
                Some((_, n)) => *n += 1,
                None => counts.push((installer, 1)),
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        DatabaseSummary {
            total: self.records.len(),
            sdk_version,
            fingerprint,
            installer_counts: counts,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// A synthetic database with a realistic mix: system apps, a Play
    /// Store install, sideloaded apps, and the store itself.
    pub const MIXED_DB: &str = r#"<?xml version='1.0' encoding='utf-8' standalone='yes' ?>
<packages>
  <version sdkVersion="35" databaseVersion="3" buildFingerprint="google/husky/husky:15/AP31/12153596:user/release-keys" />
  <package name="com.android.systemui" codePath="/system_ext/priv-app/SystemUI" userId="10140" />
  <package name="com.android.vending" codePath="/data/app/~~abc==/com.android.vending-Q1/" userId="10139" installer="com.android.vending" packageSource="2">
    <sigs count="1" schemeVersion="3" />
  </package>
  <package name="com.example.fromstore" codePath="/data/app/~~def==/com.example.fromstore-R2/" userId="10231" installer="com.android.vending" installInitiator="com.android.vending" installerUid="10139" packageSource="2" />
  <package name="com.example.sideload" codePath="/data/app/~~ghi==/com.example.sideload-S3/" userId="10242" installer="com.android.packageinstaller" packageSource="3" isOrphaned="true">
    <perms>
      <item name="android.permission.INTERNET" granted="true" />
    </perms>
  </package>
  <package name="com.example.adbinstall" codePath="/data/app/~~jkl==/com.example.adbinstall-T4/" userId="10253" packageSource="4" installOriginator="com.example.lab" />
</packages>
"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::MIXED_DB;
    use super::*;

    #[test]
    fn parse_indexes_all_records() {
        let db = PackageDb::parse(MIXED_DB).unwrap();
        assert_eq!(db.records().len(), 5);
        assert_eq!(db.find("com.example.sideload").unwrap().user_id(), Some("10242"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = PackageDb::parse("this is not a database").unwrap_err();
        assert_eq!(err.kind(), "parse-error");
    }

    #[test]
    fn nameless_package_element_is_a_parse_error() {
        let err = PackageDb::parse(r#"<packages><package codePath="/x" /></packages>"#)
            .unwrap_err();
        assert_eq!(err.kind(), "parse-error");
    }

    #[test]
    fn sideloaded_filter_matches_spec_definition() {
        // Exactly the non-system records whose installer is absent or not
        // the Play Store id.
        let db = PackageDb::parse(MIXED_DB).unwrap();
        let names: Vec<&str> = db
            .classify(&PackageFilter::Sideloaded)
            .into_iter()
            .map(|i| db.records()[i].name())
            .collect();
        assert_eq!(names, vec!["com.example.sideload", "com.example.adbinstall"]);
    }

    #[test]
    fn other_filters() {
        let db = PackageDb::parse(MIXED_DB).unwrap();
        assert_eq!(db.classify(&PackageFilter::All).len(), 5);
        assert_eq!(db.classify(&PackageFilter::System).len(), 1);
        assert_eq!(db.classify(&PackageFilter::User).len(), 4);
        assert_eq!(db.classify(&PackageFilter::NoInstaller).len(), 2);
        assert_eq!(
            db.classify(&PackageFilter::Single("com.example.sideload".into())).len(),
            1
        );
    }

    #[test]
    fn patch_is_idempotent() {
        let mut db = PackageDb::parse(MIXED_DB).unwrap();
        let target = PatchTarget::play_store();

        let first = db.patch(&PackageFilter::Sideloaded, &target).unwrap();
        assert_eq!(first, 2);

        let second = db.patch(&PackageFilter::Sideloaded, &target).unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn patch_sets_full_attribution() {
        let mut db = PackageDb::parse(MIXED_DB).unwrap();
        db.patch(&PackageFilter::Single("com.example.sideload".into()), &PatchTarget::play_store())
            .unwrap();

        let record = db.find("com.example.sideload").unwrap();
        assert_eq!(record.installer(), Some(device::PLAY_STORE_PACKAGE));
        assert_eq!(record.attr("installInitiator"), Some(device::PLAY_STORE_PACKAGE));
        // Play Store's own uid from the database.
        assert_eq!(record.attr("installerUid"), Some("10139"));
        assert_eq!(record.package_source(), Some("0"));
        assert_eq!(record.attr("isOrphaned"), None);
    }

    #[test]
    fn patch_remove_origin_strips_attribution() {
        let mut db = PackageDb::parse(MIXED_DB).unwrap();
        let changed = db
            .patch(
                &PackageFilter::Single("com.example.fromstore".into()),
                &PatchTarget::RemoveOrigin,
            )
            .unwrap();
        assert_eq!(changed, 1);

        let record = db.find("com.example.fromstore").unwrap();
        assert_eq!(record.installer(), None);
        assert_eq!(record.attr("installerUid"), None);
        assert_eq!(record.package_source(), Some("0"));
    }

    #[test]
    fn patch_missing_installer_target_fails_before_mutating() {
        let mut db = PackageDb::parse(MIXED_DB).unwrap();
        let target = PatchTarget::Installer {
            package: "com.absent.store".into(),
            package_source: "0".into(),
        };
        let err = db.patch(&PackageFilter::All, &target).unwrap_err();
        assert_eq!(err.kind(), "not-found");
        assert_eq!(db.to_document(), MIXED_DB);
    }

    #[test]
    fn untouched_records_round_trip_verbatim() {
        let mut db = PackageDb::parse(MIXED_DB).unwrap();
        // No changes at all: exact identity.
        assert_eq!(db.to_document(), MIXED_DB);

        db.patch(&PackageFilter::Single("com.example.sideload".into()), &PatchTarget::play_store())
            .unwrap();
        let out = db.to_document();

        // Child elements and unrelated records are byte-identical.
        assert!(out.contains(r#"<item name="android.permission.INTERNET" granted="true" />"#));
        assert!(out.contains(r#"<package name="com.android.systemui" codePath="/system_ext/priv-app/SystemUI" userId="10140" />"#));
        assert!(out.contains("buildFingerprint=\"google/husky"));

        // The rendered document re-parses and reflects the change.
        let reparsed = PackageDb::parse(&out).unwrap();
        assert_eq!(
            reparsed.find("com.example.sideload").unwrap().installer(),
            Some(device::PLAY_STORE_PACKAGE)
        );
    }

    #[test]
    fn summary_counts_installers() {
        let db = PackageDb::parse(MIXED_DB).unwrap();
        let summary = db.summarize();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.sdk_version.as_deref(), Some("35"));
        assert_eq!(summary.installer_counts[0], ("None".into(), 2));
        assert!(summary
            .installer_counts
            .contains(&("com.android.vending".into(), 2)));
    }
}
