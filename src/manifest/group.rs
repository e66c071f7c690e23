//! Manifest groups: the declarative input of one archive build.
//!
//! A group holds entry declarations plus nested groups. Flattening walks the tree
//! depth-first in declaration order, resolves every destination path and attribute
//! set, and yields entries tagged with the name of the group that declared them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::attrs::{self, AttrOverrides, Mode};
use crate::common::{ContentSource, Entry, EntryKind};
use crate::paths::{self, StripPrefix};
use crate::PackageError;

/// What a declaration places at its path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpecKind {
    /// A file read from disk. `src` defaults to the declared path under the source root.
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        src: Option<PathBuf>,
    },
    /// A file with literal content.
    Inline { content: String },
    EmptyFile,
    Directory,
    EmptyDirectory,
    Symlink { target: String },
}

/// One declaration inside a group. `path` is the raw, source-relative path that the
/// strip-prefix rule and the group prefixes turn into a destination.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntrySpec {
    pub path: String,
    #[serde(flatten)]
    pub kind: SpecKind,
    /// Logical package location of the source, consulted by `strip_prefix: auto`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "AttrOverrides::is_empty")]
    pub attributes: AttrOverrides,
}

impl EntrySpec {
    fn new(path: impl Into<String>, kind: SpecKind) -> Self {
        EntrySpec { path: path.into(), kind, package: None, attributes: AttrOverrides::default() }
    }

    pub fn file(path: impl Into<String>, src: impl Into<PathBuf>) -> Self {
        Self::new(path, SpecKind::File { src: Some(src.into()) })
    }

    pub fn inline(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(path, SpecKind::Inline { content: content.into() })
    }

    pub fn empty_file(path: impl Into<String>) -> Self {
        Self::new(path, SpecKind::EmptyFile)
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self::new(path, SpecKind::Directory)
    }

    pub fn empty_directory(path: impl Into<String>) -> Self {
        Self::new(path, SpecKind::EmptyDirectory)
    }

    pub fn symlink(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(path, SpecKind::Symlink { target: target.into() })
    }

    pub fn with_attrs(mut self, attributes: AttrOverrides) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.attributes.mode = Some(mode);
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Converts the declaration into an entry kind. Empty files and empty directories
    /// are sugar over their full counterparts.
    fn entry_kind(&self, source_root: Option<&Path>) -> EntryKind {
        match &self.kind {
            SpecKind::File { src } => {
                let src = src.clone().unwrap_or_else(|| PathBuf::from(&self.path));
                let src = match source_root {
                    Some(root) if src.is_relative() => root.join(src),
                    _ => src,
                };
                EntryKind::File { source: ContentSource::Path(src) }
            }
            SpecKind::Inline { content } => EntryKind::File { source: ContentSource::Bytes(content.as_bytes().to_vec()) },
            SpecKind::EmptyFile => EntryKind::File { source: ContentSource::Empty },
            SpecKind::Directory => EntryKind::Directory { empty: false },
            SpecKind::EmptyDirectory => EntryKind::Directory { empty: true },
            SpecKind::Symlink { target } => EntryKind::Symlink { target: target.clone() },
        }
    }
}

/// A named collection of declarations plus nested groups, embedded under this group's prefix.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ManifestGroup {
    pub name: String,
    /// Prepended to every destination in this group and its nested groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Overrides the strip-prefix rule inherited from the build options or outer group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_prefix: Option<StripPrefix>,
    #[serde(default, skip_serializing_if = "AttrOverrides::is_empty")]
    pub defaults: AttrOverrides,
    #[serde(default)]
    pub entries: Vec<EntrySpec>,
    #[serde(default)]
    pub groups: Vec<ManifestGroup>,
}

impl ManifestGroup {
    pub fn new(name: impl Into<String>) -> Self {
        ManifestGroup { name: name.into(), ..Default::default() }
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn strip_prefix(mut self, rule: StripPrefix) -> Self {
        self.strip_prefix = Some(rule);
        self
    }

    pub fn defaults(mut self, defaults: AttrOverrides) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn entry(mut self, spec: EntrySpec) -> Self {
        self.entries.push(spec);
        self
    }

    pub fn group(mut self, nested: ManifestGroup) -> Self {
        self.groups.push(nested);
        self
    }

    /// Builds a group from an on-disk tree. Paths are relative to `dir`; symlinks are
    /// recorded, not followed. On Unix the permission bits of files and directories are
    /// carried over as entry overrides.
    pub fn from_tree(name: impl Into<String>, dir: &Path) -> Result<Self, PackageError> {
        let mut group = ManifestGroup::new(name);
        for item in WalkDir::new(dir).min_depth(1).follow_links(false).sort_by_file_name() {
            let item = item.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                PackageError::io(e.into(), path)
            })?;
            let rel = item
                .path()
                .strip_prefix(dir)
                .map_err(|_| PackageError::invalid_path(item.path().display().to_string(), "outside of the tree root"))?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            let file_type = item.file_type();

            let spec = if file_type.is_symlink() {
                let target = std::fs::read_link(item.path()).map_err(|e| PackageError::io(e, item.path()))?;
                EntrySpec::symlink(rel, target.to_string_lossy().into_owned())
            } else if file_type.is_dir() {
                with_disk_mode(EntrySpec::directory(rel), item.path())?
            } else {
                with_disk_mode(EntrySpec::file(rel, item.path()), item.path())?
            };
            group.entries.push(spec);
        }
        Ok(group)
    }
}

#[cfg(unix)]
fn with_disk_mode(spec: EntrySpec, path: &Path) -> Result<EntrySpec, PackageError> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::symlink_metadata(path).map_err(|e| PackageError::io(e, path))?;
    Ok(match Mode::new(meta.permissions().mode() & 0o7777) {
        Some(mode) => spec.with_mode(mode),
        None => spec,
    })
}

#[cfg(not(unix))]
fn with_disk_mode(spec: EntrySpec, _path: &Path) -> Result<EntrySpec, PackageError> {
    Ok(spec)
}

/// Build-wide inputs to path and attribute resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub strip_prefix: StripPrefix,
    /// Package-directory prefix applied to every destination.
    pub package_dir: String,
    /// Base directory for relative content sources.
    pub source_root: Option<PathBuf>,
    /// Format-level default layer, chosen per entry kind.
    pub format_defaults: FormatDefaults,
}

/// Format-level default attributes per entry kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDefaults {
    pub file: AttrOverrides,
    pub directory: AttrOverrides,
    pub symlink: AttrOverrides,
}

impl Default for FormatDefaults {
    fn default() -> Self {
        FormatDefaults {
            file: AttrOverrides::default().with_mode(attrs::DEFAULT_FILE_MODE),
            directory: AttrOverrides::default().with_mode(attrs::DEFAULT_DIR_MODE),
            symlink: AttrOverrides::default(),
        }
    }
}

impl FormatDefaults {
    pub fn for_kind(&self, kind: &EntryKind) -> &AttrOverrides {
        match kind {
            EntryKind::File { .. } => &self.file,
            EntryKind::Directory { .. } => &self.directory,
            EntryKind::Symlink { .. } => &self.symlink,
        }
    }
}

/// An entry after path and attribute resolution, with the group that declared it.
#[derive(Debug, Clone)]
pub struct ResolvedEntry {
    pub entry: Entry,
    pub group: String,
}

/// Flattens groups depth-first in declaration order: a group's own entries first, then
/// its nested groups.
pub fn flatten(groups: &[ManifestGroup], options: &ResolveOptions) -> Result<Vec<ResolvedEntry>, PackageError> {
    let mut out = Vec::new();
    let mut layers = Vec::new();
    let root_prefix = paths::normalize_prefix(&options.package_dir)?;
    for group in groups {
        walk(group, &root_prefix, &options.strip_prefix, &mut layers, options, &mut out)?;
    }
    Ok(out)
}

fn walk<'g>(
    group: &'g ManifestGroup,
    outer_prefix: &str,
    inherited_strip: &StripPrefix,
    layers: &mut Vec<&'g AttrOverrides>,
    options: &ResolveOptions,
    out: &mut Vec<ResolvedEntry>,
) -> Result<(), PackageError> {
    let own_prefix = match &group.prefix {
        Some(p) => paths::normalize_prefix(p).map_err(|e| e.in_group(&group.name))?,
        None => String::new(),
    };
    let prefix = paths::join(outer_prefix, &own_prefix);
    let strip = group.strip_prefix.as_ref().unwrap_or(inherited_strip);

    layers.push(&group.defaults);
    let innermost_first: Vec<&AttrOverrides> = layers.iter().rev().copied().collect();

    for spec in &group.entries {
        let kind = spec.entry_kind(options.source_root.as_deref());
        let dest = paths::resolve(&spec.path, strip, spec.package.as_deref(), &prefix)
            .map_err(|e| e.in_group(&group.name))?;
        let attrs = attrs::resolve(
            &dest,
            &kind,
            &spec.attributes,
            &innermost_first,
            options.format_defaults.for_kind(&kind),
        )
        .map_err(|e| e.in_group(&group.name))?;
        out.push(ResolvedEntry { entry: Entry { dest, kind, attrs }, group: group.name.clone() });
    }

    for nested in &group.groups {
        walk(nested, &prefix, strip, layers, options, out)?;
    }
    layers.pop();
    Ok(())
}
