//! # Manifest Merger
//!
//! Combines resolved entries from one or more groups into a single flat manifest.
//!
//! Entries live in an arena (`Vec<Entry>`) with a flat index by destination path, so
//! the conflict check is one hash lookup per entry and nothing refers back into the
//! nested group tree once merged. The name of the declaring group is kept per slot so
//! errors raised at write time still carry group context.
//!
//! Conflict policy:
//! - a later entry of the *same* kind at an existing destination replaces it (last wins);
//! - a kind mismatch at one destination fails with `ManifestConflict`.
//!
//! The merger never synthesizes parent directories and never decides archive order;
//! both belong to the writers.

mod group;

pub use group::{flatten, EntrySpec, FormatDefaults, ManifestGroup, ResolveOptions, ResolvedEntry, SpecKind};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::Entry;
use crate::PackageError;

/// Top-level JSON document accepted from the declarative front-end.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ManifestDocument {
    #[serde(default)]
    pub groups: Vec<ManifestGroup>,
}

impl ManifestDocument {
    pub fn from_json(data: &[u8]) -> Result<Self, PackageError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Flat mapping from destination path to a merged, attribute-resolved entry.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: Vec<Entry>,
    /// Declaring group per arena slot, replaced together with the entry.
    groups: Vec<Option<String>>,
    index: HashMap<String, usize>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves and merges groups in one step.
    pub fn from_groups(groups: &[ManifestGroup], options: &ResolveOptions) -> Result<Self, PackageError> {
        let resolved = flatten(groups, options)?;
        Self::merge(resolved)
    }

    /// Merges resolved entries in order, attaching group context to conflicts.
    pub fn merge(resolved: impl IntoIterator<Item = ResolvedEntry>) -> Result<Self, PackageError> {
        let mut manifest = Manifest::new();
        for item in resolved {
            manifest.insert_from(item.entry, Some(item.group.as_str())).map_err(|e| e.in_group(&item.group))?;
        }
        info!(entries = manifest.len(), "merged manifest");
        Ok(manifest)
    }

    /// Inserts one entry under the conflict policy.
    pub fn insert(&mut self, entry: Entry) -> Result<(), PackageError> {
        self.insert_from(entry, None)
    }

    /// Inserts one entry declared by `group`.
    pub fn insert_from(&mut self, entry: Entry, group: Option<&str>) -> Result<(), PackageError> {
        match self.index.get(&entry.dest) {
            Some(&slot) => {
                let existing = &self.entries[slot];
                if !existing.kind.same_kind(&entry.kind) {
                    return Err(PackageError::conflict(
                        entry.dest.clone(),
                        format!(
                            "already declared as a {}, cannot also be a {}",
                            existing.kind.name(),
                            entry.kind.name()
                        ),
                    ));
                }
                debug!(dest = %entry.dest, kind = entry.kind.name(), "later declaration replaces earlier one");
                self.entries[slot] = entry;
                self.groups[slot] = group.map(str::to_string);
            }
            None => {
                self.index.insert(entry.dest.clone(), self.entries.len());
                self.entries.push(entry);
                self.groups.push(group.map(str::to_string));
            }
        }
        Ok(())
    }

    pub fn get(&self, dest: &str) -> Option<&Entry> {
        self.index.get(dest).map(|&i| &self.entries[i])
    }

    /// Name of the group that declared the entry at `dest`.
    pub fn group_of(&self, dest: &str) -> Option<&str> {
        self.index.get(dest).and_then(|&i| self.groups[i].as_deref())
    }

    /// Attaches the declaring group to an error about one of this manifest's entries.
    pub fn attach_group(&self, err: PackageError) -> PackageError {
        let group = err.dest_path().and_then(|dest| self.group_of(dest)).map(str::to_string);
        match group {
            Some(group) => err.in_group(&group),
            None => err,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in first-declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Entries in archive order: bytewise lexicographic by destination, directories and
    /// files interleaved. A parent always sorts before its children.
    pub fn sorted(&self) -> Vec<&Entry> {
        let mut out: Vec<&Entry> = self.entries.iter().collect();
        out.sort_by(|a, b| a.dest.as_bytes().cmp(b.dest.as_bytes()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttrOverrides;
    use crate::common::{ContentSource, EntryKind};

    fn inline(group: &str, path: &str, content: &str) -> ManifestGroup {
        ManifestGroup::new(group).entry(EntrySpec::inline(path, content))
    }

    #[test]
    fn later_file_replaces_earlier_file() {
        let first = inline("first", "a/b", "old");
        let second = ManifestGroup::new("second")
            .entry(EntrySpec::inline("a/b", "new").with_attrs(AttrOverrides { owner: Some(5), ..Default::default() }));
        let m = Manifest::from_groups(&[first, second], &ResolveOptions::default()).unwrap();
        assert_eq!(m.len(), 1);
        let e = m.get("a/b").unwrap();
        assert_eq!(e.kind, EntryKind::File { source: ContentSource::Bytes(b"new".to_vec()) });
        assert_eq!(e.attrs.uid, 5);
        assert_eq!(m.group_of("a/b"), Some("second"));
    }

    #[test]
    fn file_and_directory_at_same_path_conflict() {
        let files = inline("files", "a/b", "x");
        let dirs = ManifestGroup::new("dirs").entry(EntrySpec::directory("a/b"));
        let err = Manifest::from_groups(&[files, dirs], &ResolveOptions::default()).unwrap_err();
        match err {
            PackageError::ManifestConflict { path, group, .. } => {
                assert_eq!(path, "a/b");
                assert_eq!(group.as_deref(), Some("dirs"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn file_and_symlink_at_same_path_conflict() {
        let g = ManifestGroup::new("g")
            .entry(EntrySpec::symlink("bin/sh", "bash"))
            .entry(EntrySpec::empty_file("bin/sh"));
        assert!(matches!(
            Manifest::from_groups(&[g], &ResolveOptions::default()),
            Err(PackageError::ManifestConflict { .. })
        ));
    }

    #[test]
    fn empty_directory_replaces_directory() {
        let g = ManifestGroup::new("g")
            .entry(EntrySpec::directory("var/lib/app"))
            .entry(EntrySpec::empty_directory("var/lib/app"));
        let m = Manifest::from_groups(&[g], &ResolveOptions::default()).unwrap();
        assert_eq!(m.get("var/lib/app").unwrap().kind, EntryKind::Directory { empty: true });
    }

    #[test]
    fn sorted_order_is_bytewise_with_parents_first() {
        let g = ManifestGroup::new("g")
            .entry(EntrySpec::empty_file("usr/bin/z"))
            .entry(EntrySpec::directory("usr"))
            .entry(EntrySpec::empty_file("usr-local"))
            .entry(EntrySpec::directory("usr/bin"))
            .entry(EntrySpec::empty_file("Usr"));
        let m = Manifest::from_groups(&[g], &ResolveOptions::default()).unwrap();
        let order: Vec<_> = m.sorted().into_iter().map(|e| e.dest.as_str()).collect();
        assert_eq!(order, ["Usr", "usr", "usr-local", "usr/bin", "usr/bin/z"]);
        // Insertion order is untouched.
        assert_eq!(m.iter().next().unwrap().dest, "usr/bin/z");
    }

    #[test]
    fn document_parses_from_json() {
        let doc = ManifestDocument::from_json(br#"{"groups": [{"name": "g", "entries": []}]}"#).unwrap();
        assert_eq!(doc.groups.len(), 1);
        assert!(ManifestDocument::from_json(br#"{"groupz": []}"#).is_err());
    }
}
