//! Common types shared by the resolver, the merger and the writers.

use std::fs;
use std::path::{Path, PathBuf};

use crate::attrs::Attributes;
use crate::PackageError;

/// Where the bytes of a file entry come from.
///
/// The core never mutates source content; on-disk sources are opened read-only
/// once per archive build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    /// A file on disk, read when the entry is serialized.
    Path(PathBuf),
    /// Bytes produced in memory (control files, generated checksums).
    Bytes(Vec<u8>),
    /// A zero-length file.
    Empty,
}

impl ContentSource {
    /// Reads the full content. `dest` is only used for error context.
    pub fn read(&self, dest: &str) -> Result<Vec<u8>, PackageError> {
        match self {
            ContentSource::Path(p) => fs::read(p).map_err(|_| missing(dest, p)),
            ContentSource::Bytes(b) => Ok(b.clone()),
            ContentSource::Empty => Ok(Vec::new()),
        }
    }

    /// Checks that the source opens as a regular file without reading it.
    pub fn check(&self, dest: &str) -> Result<(), PackageError> {
        if let ContentSource::Path(p) = self {
            let readable = fs::File::open(p).and_then(|f| f.metadata()).map(|m| m.is_file()).unwrap_or(false);
            if !readable {
                return Err(missing(dest, p));
            }
        }
        Ok(())
    }
}

fn missing(dest: &str, src: &Path) -> PackageError {
    PackageError::MissingSource { path: dest.to_string(), group: None, src: src.to_path_buf() }
}

/// What an entry places at its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File { source: ContentSource },
    /// `empty` marks a directory declared on its own, with no file required beneath it.
    Directory { empty: bool },
    /// The link value is stored verbatim and never dereferenced.
    Symlink { target: String },
}

impl EntryKind {
    pub fn name(&self) -> &'static str {
        match self {
            EntryKind::File { .. } => "file",
            EntryKind::Directory { .. } => "directory",
            EntryKind::Symlink { .. } => "symlink",
        }
    }

    /// Whether two kinds may replace each other at one destination.
    pub fn same_kind(&self, other: &EntryKind) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// One resolved placement: archive-relative destination, kind, and final attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Archive-relative destination, no leading separator.
    pub dest: String,
    pub kind: EntryKind,
    pub attrs: Attributes,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory { .. })
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, EntryKind::Symlink { .. })
    }

    /// Unix file-type bits (`S_IFREG`, `S_IFDIR`, `S_IFLNK`) for this entry.
    pub fn type_bits(&self) -> u32 {
        match self.kind {
            EntryKind::File { .. } => S_IFREG,
            EntryKind::Directory { .. } => S_IFDIR,
            EntryKind::Symlink { .. } => S_IFLNK,
        }
    }

    /// Permission bits combined with the file-type bits.
    pub fn full_mode(&self) -> u32 {
        self.type_bits() | self.attrs.mode.bits()
    }
}

pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{Attributes, Mode};

    #[test]
    fn full_mode_includes_type_bits() {
        let entry = Entry {
            dest: "usr/bin/tool".into(),
            kind: EntryKind::File { source: ContentSource::Empty },
            attrs: Attributes { mode: Mode::new(0o755).unwrap(), ..Attributes::default() },
        };
        assert_eq!(entry.full_mode(), 0o100755);
        assert!(!entry.is_dir());
    }

    #[test]
    fn missing_path_source_is_reported() {
        let src = ContentSource::Path(PathBuf::from("/definitely/not/here.txt"));
        let err = src.check("etc/x").unwrap_err();
        assert!(matches!(err, PackageError::MissingSource { .. }));
        assert!(matches!(src.read("etc/x"), Err(PackageError::MissingSource { .. })));
    }

    #[test]
    fn kind_comparison_ignores_payload() {
        let a = EntryKind::Directory { empty: true };
        let b = EntryKind::Directory { empty: false };
        let c = EntryKind::Symlink { target: "x".into() };
        assert!(a.same_kind(&b));
        assert!(!a.same_kind(&c));
    }
}
