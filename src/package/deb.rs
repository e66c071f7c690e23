//! Debian binary package assembly.
//!
//! Member order inside the `ar` container is fixed: `debian-binary`, then
//! `control.tar[.ext]`, then `data.tar[.ext]`. Both tars use `./`-rooted member
//! names, and every timestamp (tar headers and ar headers) is the normalized one.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use tracing::{debug, info};

use crate::archive::ar::ArWriter;
use crate::archive::{self, ArchiveFormat, WriteOptions};
use crate::attrs::{Attributes, DEFAULT_FILE_MODE, EXECUTABLE_MODE};
use crate::common::{ContentSource, Entry, EntryKind};
use crate::compress::Compression;
use crate::manifest::Manifest;
use crate::timestamp::TimestampPolicy;
use crate::PackageError;

pub const DEBIAN_BINARY: &[u8] = b"2.0\n";

/// Control members dpkg understands. Scripts among them are executable.
pub const CONTROL_MEMBERS: [&str; 11] = [
    "control", "conffiles", "preinst", "postinst", "prerm", "postrm", "config", "templates", "triggers",
    "shlibs", "symbols",
];
const EXECUTABLE_MEMBERS: [&str; 5] = ["preinst", "postinst", "prerm", "postrm", "config"];
const MD5SUMS: &str = "md5sums";

#[derive(Debug, Clone)]
pub struct DebOptions {
    pub data_compression: Compression,
    pub control_compression: Compression,
    pub level: Option<u32>,
    /// Generate `md5sums` from the data files unless one is supplied.
    pub md5sums: bool,
    pub timestamp: TimestampPolicy,
}

impl Default for DebOptions {
    fn default() -> Self {
        DebOptions {
            data_compression: Compression::Gzip,
            control_compression: Compression::Gzip,
            level: None,
            md5sums: true,
            timestamp: TimestampPolicy::default(),
        }
    }
}

/// Externally rendered control members, keyed by member name.
#[derive(Debug, Clone, Default)]
pub struct ControlFiles {
    members: BTreeMap<String, ContentSource>,
}

impl ControlFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member. Unknown names and duplicates are rejected.
    pub fn insert(&mut self, name: &str, content: ContentSource) -> Result<(), PackageError> {
        if !CONTROL_MEMBERS.contains(&name) && name != MD5SUMS {
            return Err(PackageError::invalid_path(name, "not a recognized Debian control member"));
        }
        if self.members.insert(name.to_string(), content).is_some() {
            return Err(PackageError::conflict(name, "control member supplied twice"));
        }
        Ok(())
    }

    pub fn with(mut self, name: &str, content: ContentSource) -> Result<Self, PackageError> {
        self.insert(name, content)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }
}

fn ar_member_name(base: &str, compression: Compression) -> String {
    match compression.extension() {
        Some(ext) => format!("{}.{}", base, ext),
        None => base.to_string(),
    }
}

/// `md5sums` body: one `<hex>  <path>` line per regular file, in archive order.
pub fn md5sums(entries: &[&Entry]) -> Result<Vec<u8>, PackageError> {
    let mut out = String::new();
    for entry in entries {
        if let EntryKind::File { source } = &entry.kind {
            let digest = md5::compute(source.read(&entry.dest)?);
            out.push_str(&format!("{:x}  {}\n", digest, entry.dest));
        }
    }
    Ok(out.into_bytes())
}

fn control_entry(name: &str, source: ContentSource) -> Entry {
    let mode = if EXECUTABLE_MEMBERS.contains(&name) { EXECUTABLE_MODE } else { DEFAULT_FILE_MODE };
    Entry {
        dest: name.to_string(),
        kind: EntryKind::File { source },
        attrs: Attributes { mode, owner_name: "root".into(), group_name: "root".into(), ..Attributes::default() },
    }
}

/// Builds a `.deb` into `out`.
pub fn build_deb<W: Write>(
    manifest: &Manifest,
    control: &ControlFiles,
    options: &DebOptions,
    out: W,
) -> Result<W, PackageError> {
    if !control.contains("control") {
        return Err(PackageError::invalid_path("control", "required Debian control member not supplied"));
    }
    if options.control_compression == Compression::Bzip2 {
        return Err(PackageError::Unsupported("dpkg does not accept a bzip2 control archive".into()));
    }

    let data_entries = archive::validate_for_write(manifest)?;
    let mtime = options.timestamp.resolve(None)?;

    let mut control_entries: Vec<Entry> = control
        .members
        .iter()
        .map(|(name, source)| control_entry(name, source.clone()))
        .collect();
    if options.md5sums && !control.contains(MD5SUMS) {
        let sums = md5sums(&data_entries).map_err(|e| manifest.attach_group(e))?;
        if !sums.is_empty() {
            control_entries.push(control_entry(MD5SUMS, ContentSource::Bytes(sums)));
        }
    }
    control_entries.sort_by(|a, b| a.dest.cmp(&b.dest));
    let control_refs: Vec<&Entry> = control_entries.iter().collect();
    for entry in &control_refs {
        if let EntryKind::File { source } = &entry.kind {
            source.check(&entry.dest)?;
        }
    }

    let tar_options = |compression| WriteOptions {
        mtime,
        compression,
        level: options.level,
        zip_store: false,
        dot_root: true,
    };
    let control_tar = archive::write_entries(
        &control_refs,
        ArchiveFormat::Tar,
        &tar_options(options.control_compression),
        Vec::new(),
    )?;
    let data_tar = archive::write_entries(
        &data_entries,
        ArchiveFormat::Tar,
        &tar_options(options.data_compression),
        Vec::new(),
    )
    .map_err(|e| manifest.attach_group(e))?;
    debug!(control = control_tar.len(), data = data_tar.len(), "deb members built");

    let mut ar = ArWriter::new(out, mtime)?;
    ar.append("debian-binary", DEBIAN_BINARY)?;
    ar.append(&ar_member_name("control.tar", options.control_compression), &control_tar)?;
    ar.append(&ar_member_name("data.tar", options.data_compression), &data_tar)?;
    info!(files = data_entries.len(), mtime, "debian package assembled");
    ar.finish()
}

/// Builds a `.deb` and writes it atomically to `output`.
pub fn build_deb_to_path(
    manifest: &Manifest,
    control: &ControlFiles,
    options: &DebOptions,
    output: &Path,
) -> Result<(), PackageError> {
    archive::write_atomically(output, |w| {
        build_deb(manifest, control, options, w)?;
        Ok(())
    })
}
