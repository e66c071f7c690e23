//! # Attribute Resolver
//!
//! Merges three layers of attributes with entry-specific values taking precedence,
//! then group defaults (innermost group first), then the format default. Each layer
//! is a set of optional values; the merge never mutates a layer and returns a fully
//! specified [`Attributes`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::common::EntryKind;
use crate::PackageError;

/// Longest owner/group name that fits a tar header field.
pub const MAX_NAME_LEN: usize = 32;

/// Permission bits, always within `0..=0o7777`. Displayed as a 4-digit octal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mode(u16);

/// Symlinks always carry this mode; link permissions are not enforced by consumers.
pub const SYMLINK_MODE: Mode = Mode(0o777);
pub const DEFAULT_FILE_MODE: Mode = Mode(0o644);
pub const DEFAULT_DIR_MODE: Mode = Mode(0o755);
pub const EXECUTABLE_MODE: Mode = Mode(0o755);

impl Mode {
    pub fn new(bits: u32) -> Option<Mode> {
        if bits <= 0o7777 {
            Some(Mode(bits as u16))
        } else {
            None
        }
    }

    pub fn bits(self) -> u32 {
        self.0 as u32
    }
}

impl FromStr for Mode {
    type Err = String;

    /// Accepts `0755`, `755`, `04755` and `0o755`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        let digits = t.strip_prefix("0o").unwrap_or(t);
        if digits.is_empty() || !digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            return Err(format!("mode '{}' is not an octal number", s));
        }
        let value = u32::from_str_radix(digits, 8).map_err(|e| format!("mode '{}': {}", s, e))?;
        Mode::new(value).ok_or_else(|| format!("mode '{}' is larger than 07777", s))
    }
}

impl TryFrom<String> for Mode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Mode> for String {
    fn from(m: Mode) -> String {
        m.to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

/// One optional-value layer: an entry's own overrides or a group's defaults.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AttrOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
}

impl AttrOverrides {
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Field-wise fallback: values set on `self` win, unset ones are taken from `lower`.
    pub fn or(&self, lower: &AttrOverrides) -> AttrOverrides {
        AttrOverrides {
            mode: self.mode.or(lower.mode),
            owner: self.owner.or(lower.owner),
            owner_name: self.owner_name.clone().or_else(|| lower.owner_name.clone()),
            group: self.group.or(lower.group),
            group_name: self.group_name.clone().or_else(|| lower.group_name.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == AttrOverrides::default()
    }
}

/// A fully specified attribute set. Numeric ids win over names when a format can only
/// store one of them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub mode: Mode,
    pub uid: u32,
    pub owner_name: String,
    pub gid: u32,
    pub group_name: String,
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes {
            mode: DEFAULT_FILE_MODE,
            uid: 0,
            owner_name: String::new(),
            gid: 0,
            group_name: String::new(),
        }
    }
}

/// Default mode for an entry kind when no layer supplies one.
pub fn default_mode(kind: &EntryKind) -> Mode {
    match kind {
        EntryKind::File { .. } => DEFAULT_FILE_MODE,
        EntryKind::Directory { .. } => DEFAULT_DIR_MODE,
        EntryKind::Symlink { .. } => SYMLINK_MODE,
    }
}

fn check_name(dest: &str, what: &str, name: &str) -> Result<(), PackageError> {
    if name.len() > MAX_NAME_LEN {
        return Err(PackageError::invalid_attribute(
            dest,
            format!("{} '{}' is longer than {} bytes", what, name, MAX_NAME_LEN),
        ));
    }
    if name.contains('\0') {
        return Err(PackageError::invalid_attribute(dest, format!("{} contains a NUL byte", what)));
    }
    Ok(())
}

/// Merges the layers for one entry.
///
/// * `entry` - the entry's own overrides.
/// * `groups` - group defaults, innermost group first.
/// * `format_default` - the format-level default layer for this entry kind.
///
/// An explicit mode on a symlink entry is rejected; group-level default modes are simply
/// not applied to symlinks.
pub fn resolve(
    dest: &str,
    kind: &EntryKind,
    entry: &AttrOverrides,
    groups: &[&AttrOverrides],
    format_default: &AttrOverrides,
) -> Result<Attributes, PackageError> {
    let is_link = matches!(kind, EntryKind::Symlink { .. });
    if is_link {
        if let Some(mode) = entry.mode {
            return Err(PackageError::invalid_attribute(
                dest,
                format!("symlinks cannot carry an explicit mode (got {})", mode),
            ));
        }
    }

    let merged = groups
        .iter()
        .fold(entry.clone(), |acc, layer| acc.or(layer))
        .or(format_default);

    let mode = if is_link {
        SYMLINK_MODE
    } else {
        merged.mode.unwrap_or_else(|| default_mode(kind))
    };

    let owner_name = merged.owner_name.unwrap_or_default();
    let group_name = merged.group_name.unwrap_or_default();
    check_name(dest, "owner name", &owner_name)?;
    check_name(dest, "group name", &group_name)?;

    Ok(Attributes {
        mode,
        uid: merged.owner.unwrap_or(0),
        owner_name,
        gid: merged.group.unwrap_or(0),
        group_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ContentSource;

    fn file() -> EntryKind {
        EntryKind::File { source: ContentSource::Empty }
    }

    #[test]
    fn parses_octal_modes() {
        assert_eq!("0755".parse::<Mode>().unwrap().bits(), 0o755);
        assert_eq!("755".parse::<Mode>().unwrap().bits(), 0o755);
        assert_eq!("04755".parse::<Mode>().unwrap().bits(), 0o4755);
        assert_eq!("0o644".parse::<Mode>().unwrap().bits(), 0o644);
        assert_eq!("644".parse::<Mode>().unwrap().to_string(), "0644");
    }

    #[test]
    fn rejects_malformed_modes() {
        assert!("0858".parse::<Mode>().is_err());
        assert!("rwxr-xr-x".parse::<Mode>().is_err());
        assert!("17777".parse::<Mode>().is_err());
        assert!("".parse::<Mode>().is_err());
    }

    #[test]
    fn entry_beats_group_beats_format() {
        let entry = AttrOverrides { owner_name: Some("app".into()), ..Default::default() };
        let group = AttrOverrides {
            mode: Some("0600".parse().unwrap()),
            owner_name: Some("ignored".into()),
            group: Some(50),
            ..Default::default()
        };
        let format = AttrOverrides::default().with_mode("0644".parse().unwrap());
        let attrs = resolve("etc/app.conf", &file(), &entry, &[&group], &format).unwrap();
        assert_eq!(attrs.mode.bits(), 0o600);
        assert_eq!(attrs.owner_name, "app");
        assert_eq!(attrs.gid, 50);
        assert_eq!(attrs.uid, 0);
    }

    #[test]
    fn inner_group_wins_over_outer() {
        let inner = AttrOverrides { mode: Some("0700".parse().unwrap()), ..Default::default() };
        let outer = AttrOverrides { mode: Some("0444".parse().unwrap()), owner: Some(7), ..Default::default() };
        let attrs = resolve("x", &file(), &AttrOverrides::default(), &[&inner, &outer], &AttrOverrides::default()).unwrap();
        assert_eq!(attrs.mode.bits(), 0o700);
        assert_eq!(attrs.uid, 7);
    }

    #[test]
    fn defaults_to_root_identity() {
        let attrs = resolve("d", &EntryKind::Directory { empty: true }, &AttrOverrides::default(), &[], &AttrOverrides::default()).unwrap();
        assert_eq!(attrs.mode, DEFAULT_DIR_MODE);
        assert_eq!((attrs.uid, attrs.gid), (0, 0));
        assert!(attrs.owner_name.is_empty());
    }

    #[test]
    fn numeric_and_symbolic_owner_are_both_kept() {
        let entry = AttrOverrides { owner: Some(1000), owner_name: Some("dev".into()), ..Default::default() };
        let attrs = resolve("x", &file(), &entry, &[], &AttrOverrides::default()).unwrap();
        assert_eq!(attrs.uid, 1000);
        assert_eq!(attrs.owner_name, "dev");
    }

    #[test]
    fn symlinks_get_fixed_mode_and_reject_explicit_mode() {
        let link = EntryKind::Symlink { target: "target".into() };
        let group = AttrOverrides { mode: Some("0600".parse().unwrap()), ..Default::default() };
        let attrs = resolve("l", &link, &AttrOverrides::default(), &[&group], &AttrOverrides::default()).unwrap();
        assert_eq!(attrs.mode, SYMLINK_MODE);

        let explicit = AttrOverrides { mode: Some("0600".parse().unwrap()), ..Default::default() };
        let err = resolve("l", &link, &explicit, &[], &AttrOverrides::default()).unwrap_err();
        assert!(matches!(err, PackageError::InvalidAttribute { .. }));
    }

    #[test]
    fn rejects_overlong_names() {
        let entry = AttrOverrides { group_name: Some("g".repeat(40)), ..Default::default() };
        assert!(resolve("x", &file(), &entry, &[], &AttrOverrides::default()).is_err());
    }

    #[test]
    fn mode_deserializes_from_json_string() {
        let o: AttrOverrides = serde_json::from_str(r#"{"mode": "755", "owner": 0}"#).unwrap();
        assert_eq!(o.mode.unwrap().bits(), 0o755);
        assert!(serde_json::from_str::<AttrOverrides>(r#"{"mode": "9"}"#).is_err());
    }
}
