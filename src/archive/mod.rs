//! # Archive Writers
//!
//! Serializes a merged [`Manifest`] into a container format. Every build runs in two
//! passes:
//!
//! 1. [`validate_for_write`] flattens the manifest into archive order and checks every
//!    entry (canonical destinations, no file used as a directory, readable sources).
//! 2. The format's [`EntryWriter`] receives the entries in that order, each stamped with
//!    the one timestamp resolved for the build.
//!
//! Output written to a path goes to a temporary file next to the target, which is only
//! moved into place once the archive is complete.

pub mod ar;
pub mod cpio;
pub mod tar;
pub mod zip;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::common::{Entry, EntryKind};
use crate::compress::{CompressedWriter, Compression};
use crate::manifest::{FormatDefaults, Manifest, ManifestGroup, ResolveOptions};
use crate::paths::{self, StripPrefix};
use crate::timestamp::{TimestampPolicy, ZIP_EPOCH_FLOOR};
use crate::PackageError;

/// Container formats a manifest can be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Tar,
    Zip,
    /// SVR4 `newc` cpio.
    Cpio,
}

impl ArchiveFormat {
    /// Detects format and compression from a file name.
    pub fn detect(name: &str) -> Option<(ArchiveFormat, Compression)> {
        let lower = name.to_ascii_lowercase();
        let shorthand = [
            (".tgz", Compression::Gzip),
            (".tbz2", Compression::Bzip2),
            (".tbz", Compression::Bzip2),
            (".txz", Compression::Xz),
            (".tzst", Compression::Zstd),
        ];
        for (suffix, compression) in shorthand {
            if lower.ends_with(suffix) {
                return Some((ArchiveFormat::Tar, compression));
            }
        }
        if lower.ends_with(".zip") {
            return Some((ArchiveFormat::Zip, Compression::None));
        }

        // `<stem>.<container>[.<filter>]`
        let mut parts = lower.rsplit('.');
        let last = parts.next()?;
        let (container, compression) = match Compression::from_extension(last) {
            Some(c) => (parts.next()?, c),
            None => (last, Compression::None),
        };
        match container {
            "tar" => Some((ArchiveFormat::Tar, compression)),
            "cpio" => Some((ArchiveFormat::Cpio, compression)),
            _ => None,
        }
    }

    /// Earliest timestamp the format can represent, if it has one.
    pub fn timestamp_floor(self) -> Option<u64> {
        match self {
            ArchiveFormat::Zip => Some(ZIP_EPOCH_FLOOR),
            ArchiveFormat::Tar | ArchiveFormat::Cpio => None,
        }
    }

    /// Format-level default attributes.
    pub fn defaults(self) -> FormatDefaults {
        FormatDefaults::default()
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tar" => Ok(ArchiveFormat::Tar),
            "zip" => Ok(ArchiveFormat::Zip),
            "cpio" => Ok(ArchiveFormat::Cpio),
            other => Err(format!("unknown archive format '{}' (expected tar, zip or cpio)", other)),
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Cpio => "cpio",
        })
    }
}

/// Holds all configuration options for one archive build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Container format. Detected from the output name when unset, else tar.
    pub format: Option<ArchiveFormat>,
    /// Compression filter for tar and cpio. Detected from the output name when unset.
    pub compression: Option<Compression>,
    /// Codec level; deflate level for zip members.
    pub level: Option<u32>,
    /// Treat the output as if it carried this extension (e.g. `tar.gz`) when detecting.
    pub extension: Option<String>,
    pub timestamp: TimestampPolicy,
    pub strip_prefix: StripPrefix,
    pub package_dir: String,
    pub source_root: Option<PathBuf>,
    /// Store zip members without deflate.
    pub zip_store: bool,
}

impl BuildOptions {
    /// Picks format and compression: explicit options first, then the extension
    /// override, then the output file name.
    pub fn target(&self, output: Option<&Path>) -> (ArchiveFormat, Compression) {
        let detected = match (&self.extension, output) {
            (Some(ext), _) => ArchiveFormat::detect(&format!("out.{}", ext.trim_start_matches('.'))),
            (None, Some(path)) => path.file_name().and_then(|n| n.to_str()).and_then(ArchiveFormat::detect),
            (None, None) => None,
        };
        let format = self.format.or(detected.map(|(f, _)| f)).unwrap_or(ArchiveFormat::Tar);
        let compression = self
            .compression
            .or(detected.filter(|(f, _)| *f == format).map(|(_, c)| c))
            .unwrap_or_default();
        (format, compression)
    }

    pub fn resolve_options(&self, format: ArchiveFormat) -> ResolveOptions {
        ResolveOptions {
            strip_prefix: self.strip_prefix.clone(),
            package_dir: self.package_dir.clone(),
            source_root: self.source_root.clone(),
            format_defaults: format.defaults(),
        }
    }
}

/// Fully resolved serialization settings, shared by the archive and package builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    pub mtime: u64,
    pub compression: Compression,
    pub level: Option<u32>,
    pub zip_store: bool,
    /// Prefix member names with `./` and emit a `./` root directory (tar) as Debian
    /// and RPM payloads expect.
    pub dot_root: bool,
}

/// One container serializer. Entries arrive validated and in archive order.
pub trait EntryWriter {
    /// Appends one entry. `content` is the file body for files and empty otherwise.
    fn append(&mut self, entry: &Entry, content: &[u8]) -> Result<(), PackageError>;
}

/// Flattens and checks the manifest before any byte is written. Returns entries in
/// archive order: bytewise lexicographic by destination.
/// Errors carry the name of the group that declared the offending entry.
pub fn validate_for_write(manifest: &Manifest) -> Result<Vec<&Entry>, PackageError> {
    check_entries(manifest).map_err(|e| manifest.attach_group(e))
}

fn check_entries(manifest: &Manifest) -> Result<Vec<&Entry>, PackageError> {
    let entries = manifest.sorted();
    let mut seen: HashSet<String> = HashSet::with_capacity(entries.len());

    for entry in &entries {
        let normalized = paths::normalize(&entry.dest)?;
        if !seen.insert(normalized.clone()) {
            return Err(PackageError::conflict(
                entry.dest.clone(),
                format!("collides with another entry at '{}' after normalization", normalized),
            ));
        }
        paths::validate_dest(&entry.dest)?;
    }

    for entry in &entries {
        let mut ancestor = paths::parent(&entry.dest);
        while let Some(dir) = ancestor {
            if let Some(parent) = manifest.get(dir) {
                if !parent.is_dir() {
                    return Err(PackageError::conflict(
                        entry.dest.clone(),
                        format!("parent '{}' is a {}, not a directory", dir, parent.kind.name()),
                    ));
                }
            }
            ancestor = paths::parent(dir);
        }
        if let EntryKind::File { source } = &entry.kind {
            source.check(&entry.dest)?;
        }
    }
    debug!(entries = entries.len(), "manifest validated for writing");
    Ok(entries)
}

fn feed<E: EntryWriter>(writer: &mut E, entries: &[&Entry]) -> Result<(), PackageError> {
    for entry in entries {
        let content = match &entry.kind {
            EntryKind::File { source } => source.read(&entry.dest)?,
            _ => Vec::new(),
        };
        writer.append(entry, &content)?;
    }
    Ok(())
}

/// Serializes already validated entries. Lower-level than [`write_archive`].
pub fn write_entries<W: Write>(
    entries: &[&Entry],
    format: ArchiveFormat,
    options: &WriteOptions,
    out: W,
) -> Result<W, PackageError> {
    match format {
        ArchiveFormat::Tar => {
            let filtered = CompressedWriter::new(out, options.compression, options.level)?;
            let mut writer = tar::TarWriter::new(filtered, options.mtime, options.dot_root)?;
            feed(&mut writer, entries)?;
            Ok(writer.finish()?.finish()?)
        }
        ArchiveFormat::Cpio => {
            let filtered = CompressedWriter::new(out, options.compression, options.level)?;
            let mut writer = cpio::CpioWriter::new(filtered, options.mtime, options.dot_root);
            feed(&mut writer, entries)?;
            Ok(writer.finish()?.finish()?)
        }
        ArchiveFormat::Zip => {
            if options.compression != Compression::None {
                return Err(PackageError::Unsupported(format!(
                    "zip members are deflated internally; {} cannot be applied to a zip archive",
                    options.compression
                )));
            }
            let level = if options.zip_store { None } else { Some(Compression::Gzip.level(options.level)?) };
            let mut writer = zip::ZipWriter::new(out, options.mtime, level);
            feed(&mut writer, entries)?;
            writer.finish()
        }
    }
}

/// Validates and serializes a manifest into `out`.
pub fn write_archive<W: Write>(
    manifest: &Manifest,
    format: ArchiveFormat,
    compression: Compression,
    options: &BuildOptions,
    out: W,
) -> Result<W, PackageError> {
    let entries = validate_for_write(manifest)?;
    let mtime = options.timestamp.resolve(format.timestamp_floor())?;
    info!(%format, %compression, entries = entries.len(), mtime, "writing archive");
    let write = WriteOptions {
        mtime,
        compression,
        level: options.level,
        zip_store: options.zip_store,
        dot_root: false,
    };
    write_entries(&entries, format, &write, out).map_err(|e| manifest.attach_group(e))
}

/// Builds an archive in memory.
pub fn build(manifest: &Manifest, format: ArchiveFormat, options: &BuildOptions) -> Result<Vec<u8>, PackageError> {
    write_archive(manifest, format, options.compression.unwrap_or_default(), options, Vec::new())
}

/// Writes bytes produced by `fill` to `output` atomically: a temporary file in the same
/// directory is persisted only when `fill` succeeds.
pub fn write_atomically<F>(output: &Path, fill: F) -> Result<(), PackageError>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<(), PackageError>,
{
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| PackageError::io(e, &dir))?;
    let mut temp = NamedTempFile::new_in(&dir).map_err(|e| PackageError::io(e, &dir))?;
    {
        let mut writer = BufWriter::new(&mut temp);
        fill(&mut writer)?;
        writer.flush().map_err(|e| PackageError::io(e, output))?;
    }
    temp.persist(output).map_err(|e| PackageError::io(e.error, output))?;
    Ok(())
}

/// Builds an archive and writes it to `output`. Format and compression follow
/// [`BuildOptions::target`].
pub fn build_to_path(manifest: &Manifest, options: &BuildOptions, output: &Path) -> Result<ArchiveFormat, PackageError> {
    let (format, compression) = options.target(Some(output));
    write_atomically(output, |w| {
        write_archive(manifest, format, compression, options, w)?;
        Ok(())
    })?;
    info!(path = %output.display(), "archive written");
    Ok(format)
}

/// Resolves and merges groups, then writes the archive to `output`.
pub fn build_groups_to_path(
    groups: &[ManifestGroup],
    options: &BuildOptions,
    output: &Path,
) -> Result<ArchiveFormat, PackageError> {
    let (format, _) = options.target(Some(output));
    let manifest = Manifest::from_groups(groups, &options.resolve_options(format))?;
    build_to_path(&manifest, options, output)
}
