//! RPM packaging.
//!
//! Two paths are offered:
//! - hand-off to an external rpmbuild: [`files_section`] renders the `%files` list,
//!   [`prepare_spec`] splices it into a pre-rendered spec, and [`stage_buildroot`]
//!   materializes the manifest into a buildroot directory;
//! - a native writer, [`build_rpm`], that emits an unsigned RPM v3 file: the 96-byte
//!   lead, a signature header (size, MD5, payload size), the main header and a
//!   compressed cpio `newc` payload.
//!
//! Build time and every file mtime come from the normalized timestamp, so identical
//! inputs produce identical packages.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::identity;
use crate::archive::cpio::CpioWriter;
use crate::archive::{self, EntryWriter};
use crate::common::{Entry, EntryKind};
use crate::compress::{compress_bytes, Compression};
use crate::fsx;
use crate::manifest::Manifest;
use crate::paths;
use crate::timestamp::TimestampPolicy;
use crate::PackageError;

const LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
const LEAD_LEN: usize = 96;
const LEAD_NAME_LEN: usize = 66;
const HEADER_MAGIC: [u8; 3] = [0x8e, 0xad, 0xe8];
const HEADER_VERSION: u8 = 1;
const SIGNATURE_TYPE_HEADER: u16 = 5;
const OS_LINUX: u16 = 1;

const SIGTAG_SIZE: u32 = 1000;
const SIGTAG_MD5: u32 = 1004;
const SIGTAG_PAYLOADSIZE: u32 = 1007;

const RPMTAG_HEADERI18NTABLE: u32 = 100;
const RPMTAG_NAME: u32 = 1000;
const RPMTAG_VERSION: u32 = 1001;
const RPMTAG_RELEASE: u32 = 1002;
const RPMTAG_SUMMARY: u32 = 1004;
const RPMTAG_DESCRIPTION: u32 = 1005;
const RPMTAG_BUILDTIME: u32 = 1006;
const RPMTAG_BUILDHOST: u32 = 1007;
const RPMTAG_SIZE: u32 = 1009;
const RPMTAG_LICENSE: u32 = 1014;
const RPMTAG_GROUP: u32 = 1016;
const RPMTAG_OS: u32 = 1021;
const RPMTAG_ARCH: u32 = 1022;
const RPMTAG_FILESIZES: u32 = 1028;
const RPMTAG_FILEMODES: u32 = 1030;
const RPMTAG_FILERDEVS: u32 = 1033;
const RPMTAG_FILEMTIMES: u32 = 1034;
const RPMTAG_FILEMD5S: u32 = 1035;
const RPMTAG_FILELINKTOS: u32 = 1036;
const RPMTAG_FILEFLAGS: u32 = 1037;
const RPMTAG_FILEUSERNAME: u32 = 1039;
const RPMTAG_FILEGROUPNAME: u32 = 1040;
const RPMTAG_SOURCERPM: u32 = 1044;
const RPMTAG_FILEVERIFYFLAGS: u32 = 1045;
const RPMTAG_RPMVERSION: u32 = 1064;
const RPMTAG_FILEDEVICES: u32 = 1095;
const RPMTAG_FILEINODES: u32 = 1096;
const RPMTAG_FILELANGS: u32 = 1097;
const RPMTAG_DIRINDEXES: u32 = 1116;
const RPMTAG_BASENAMES: u32 = 1117;
const RPMTAG_DIRNAMES: u32 = 1118;
const RPMTAG_PAYLOADFORMAT: u32 = 1124;
const RPMTAG_PAYLOADCOMPRESSOR: u32 = 1125;
const RPMTAG_PAYLOADFLAGS: u32 = 1126;

/// Package metadata for the native writer, usually read from JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RpmMetadata {
    pub name: String,
    pub version: String,
    #[serde(default = "default_release")]
    pub release: String,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default = "default_os")]
    pub os: String,
    /// Defaults to the package name.
    #[serde(default)]
    pub summary: Option<String>,
    /// Defaults to the summary.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_license")]
    pub license: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_build_host")]
    pub build_host: String,
}

fn default_release() -> String {
    "1".into()
}
fn default_arch() -> String {
    "noarch".into()
}
fn default_os() -> String {
    "linux".into()
}
fn default_license() -> String {
    "Unknown".into()
}
fn default_group() -> String {
    "Unspecified".into()
}
fn default_build_host() -> String {
    "localhost".into()
}

impl RpmMetadata {
    pub fn from_json(data: &[u8]) -> Result<Self, PackageError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// `name-version-release`.
    pub fn nevr(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.release)
    }

    fn arch_number(&self) -> u16 {
        match self.arch.as_str() {
            "x86_64" | "i386" | "i686" => 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RpmOptions {
    pub compression: Compression,
    pub level: Option<u32>,
    pub timestamp: TimestampPolicy,
}

impl Default for RpmOptions {
    fn default() -> Self {
        RpmOptions { compression: Compression::Gzip, level: None, timestamp: TimestampPolicy::default() }
    }
}

// ---------------------------------------------------------------------------
// rpmbuild hand-off
// ---------------------------------------------------------------------------

/// Renders one `%files` line per entry, in archive order. Directories are marked
/// `%dir`; symlinks keep the `-` mode since rpm ignores link permissions.
pub fn files_section(manifest: &Manifest) -> Result<String, PackageError> {
    let entries = archive::validate_for_write(manifest)?;
    let mut out = String::new();
    for entry in entries {
        let owner = identity(&entry.attrs.owner_name, entry.attrs.uid);
        let group = identity(&entry.attrs.group_name, entry.attrs.gid);
        let mode = if entry.is_symlink() { "-".to_string() } else { entry.attrs.mode.to_string() };
        let dir = if entry.is_dir() { "%dir " } else { "" };
        out.push_str(&format!("{}%attr({}, {}, {}) \"/{}\"\n", dir, mode, owner, group, entry.dest));
    }
    Ok(out)
}

/// Places the rendered file list under the spec's `%files` line, or appends a
/// `%files` section when the spec has none.
pub fn prepare_spec(spec: &str, manifest: &Manifest) -> Result<String, PackageError> {
    let listing = files_section(manifest)?;
    let mut out = String::with_capacity(spec.len() + listing.len() + 8);
    let mut placed = false;
    for line in spec.lines() {
        out.push_str(line);
        out.push('\n');
        if !placed && line.trim() == "%files" {
            out.push_str(&listing);
            placed = true;
        }
    }
    if !placed {
        if !out.is_empty() && !out.ends_with("\n\n") {
            out.push('\n');
        }
        out.push_str("%files\n");
        out.push_str(&listing);
    }
    Ok(out)
}

/// Materializes the manifest under `root`: directories, file contents with their
/// modes, and symlinks. Ownership is left to the `%attr` lines.
///
/// Directory modes are applied last, deepest first, so a read-only directory can
/// still receive its children.
pub fn stage_buildroot(manifest: &Manifest, root: &Path) -> Result<(), PackageError> {
    let entries = archive::validate_for_write(manifest)?;
    fs::create_dir_all(root).map_err(|e| PackageError::io(e, root))?;
    let mut directories = Vec::new();
    for entry in &entries {
        let target = root.join(&entry.dest);
        if let Some(parent) = paths::parent(&entry.dest) {
            let dir = root.join(parent);
            fs::create_dir_all(&dir).map_err(|e| PackageError::io(e, &dir))?;
        }
        match &entry.kind {
            EntryKind::Directory { .. } => {
                fs::create_dir_all(&target).map_err(|e| PackageError::io(e, &target))?;
                directories.push((target, entry.attrs.mode.bits()));
            }
            EntryKind::File { source } => {
                let data = source.read(&entry.dest).map_err(|e| manifest.attach_group(e))?;
                fs::write(&target, data).map_err(|e| PackageError::io(e, &target))?;
                fsx::set_unix_permissions(&target, entry.attrs.mode.bits())
                    .map_err(|e| PackageError::io(e, &target))?;
            }
            EntryKind::Symlink { target: link } => {
                fsx::symlink(link, &target).map_err(|e| PackageError::io(e, &target))?;
            }
        }
    }
    // Archive order puts parents before children.
    for (dir, mode) in directories.iter().rev() {
        fsx::set_unix_permissions(dir, *mode).map_err(|e| PackageError::io(e, dir))?;
    }
    info!(root = %root.display(), entries = entries.len(), "buildroot staged");
    Ok(())
}

// ---------------------------------------------------------------------------
// Native writer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum TagValue {
    Int16(Vec<u16>),
    Int32(Vec<u32>),
    Str(String),
    Bin(Vec<u8>),
    StrArray(Vec<String>),
    I18n(String),
}

impl TagValue {
    fn type_code(&self) -> u32 {
        match self {
            TagValue::Int16(_) => 3,
            TagValue::Int32(_) => 4,
            TagValue::Str(_) => 6,
            TagValue::Bin(_) => 7,
            TagValue::StrArray(_) => 8,
            TagValue::I18n(_) => 9,
        }
    }

    fn alignment(&self) -> usize {
        match self {
            TagValue::Int16(_) => 2,
            TagValue::Int32(_) => 4,
            _ => 1,
        }
    }
}

/// Header section builder: a sorted tag index followed by the aligned data store.
#[derive(Debug, Default)]
struct HeaderBuilder {
    tags: Vec<(u32, TagValue)>,
}

impl HeaderBuilder {
    fn add(&mut self, tag: u32, value: TagValue) -> &mut Self {
        self.tags.push((tag, value));
        self
    }

    fn string(&mut self, tag: u32, value: &str) -> &mut Self {
        self.add(tag, TagValue::Str(value.to_string()))
    }

    fn build(mut self) -> Vec<u8> {
        self.tags.sort_by_key(|(tag, _)| *tag);
        let mut store: Vec<u8> = Vec::new();
        let mut index: Vec<u8> = Vec::with_capacity(self.tags.len() * 16);

        for (tag, value) in &self.tags {
            while store.len() % value.alignment() != 0 {
                store.push(0);
            }
            let offset = store.len() as u32;
            let count = match value {
                TagValue::Int16(values) => {
                    values.iter().for_each(|v| store.extend_from_slice(&v.to_be_bytes()));
                    values.len()
                }
                TagValue::Int32(values) => {
                    values.iter().for_each(|v| store.extend_from_slice(&v.to_be_bytes()));
                    values.len()
                }
                TagValue::Str(s) | TagValue::I18n(s) => {
                    store.extend_from_slice(s.as_bytes());
                    store.push(0);
                    1
                }
                TagValue::Bin(bytes) => {
                    store.extend_from_slice(bytes);
                    bytes.len()
                }
                TagValue::StrArray(items) => {
                    for s in items {
                        store.extend_from_slice(s.as_bytes());
                        store.push(0);
                    }
                    items.len()
                }
            };
            index.extend_from_slice(&tag.to_be_bytes());
            index.extend_from_slice(&value.type_code().to_be_bytes());
            index.extend_from_slice(&offset.to_be_bytes());
            index.extend_from_slice(&(count as u32).to_be_bytes());
        }

        let mut out = Vec::with_capacity(16 + index.len() + store.len());
        out.extend_from_slice(&HEADER_MAGIC);
        out.push(HEADER_VERSION);
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&(self.tags.len() as u32).to_be_bytes());
        out.extend_from_slice(&(store.len() as u32).to_be_bytes());
        out.extend_from_slice(&index);
        out.extend_from_slice(&store);
        out
    }
}

fn lead(meta: &RpmMetadata) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEAD_LEN);
    out.extend_from_slice(&LEAD_MAGIC);
    out.extend_from_slice(&[3, 0]); // format 3.0
    out.extend_from_slice(&0u16.to_be_bytes()); // binary package
    out.extend_from_slice(&meta.arch_number().to_be_bytes());
    let name = meta.nevr();
    let name = &name.as_bytes()[..name.len().min(LEAD_NAME_LEN - 1)];
    let mut name_field = [0u8; LEAD_NAME_LEN];
    name_field[..name.len()].copy_from_slice(name);
    out.extend_from_slice(&name_field);
    out.extend_from_slice(&OS_LINUX.to_be_bytes());
    out.extend_from_slice(&SIGNATURE_TYPE_HEADER.to_be_bytes());
    out.extend_from_slice(&[0; 16]);
    out
}

/// Per-file columns of the main header, in payload order.
#[derive(Debug, Default)]
struct FileTable {
    dirnames: Vec<String>,
    basenames: Vec<String>,
    dirindexes: Vec<u32>,
    sizes: Vec<u32>,
    modes: Vec<u16>,
    md5s: Vec<String>,
    linktos: Vec<String>,
    users: Vec<String>,
    groups: Vec<String>,
}

impl FileTable {
    fn push(&mut self, entry: &Entry, content: &[u8]) -> Result<(), PackageError> {
        let (dir, base) = match paths::parent(&entry.dest) {
            Some(parent) => (format!("/{}/", parent), paths::basename(&entry.dest)),
            None => ("/".to_string(), entry.dest.as_str()),
        };
        let dir_index = match self.dirnames.iter().position(|d| *d == dir) {
            Some(i) => i,
            None => {
                self.dirnames.push(dir);
                self.dirnames.len() - 1
            }
        };
        let (size, md5, link) = match &entry.kind {
            EntryKind::File { .. } => (content.len(), format!("{:x}", md5::compute(content)), String::new()),
            EntryKind::Directory { .. } => (0, String::new(), String::new()),
            EntryKind::Symlink { target } => (target.len(), String::new(), target.clone()),
        };
        let size = u32::try_from(size)
            .map_err(|_| PackageError::Unsupported(format!("'{}' is larger than 4 GiB", entry.dest)))?;

        self.basenames.push(base.to_string());
        self.dirindexes.push(dir_index as u32);
        self.sizes.push(size);
        self.modes.push(entry.full_mode() as u16);
        self.md5s.push(md5);
        self.linktos.push(link);
        self.users.push(identity(&entry.attrs.owner_name, entry.attrs.uid));
        self.groups.push(identity(&entry.attrs.group_name, entry.attrs.gid));
        Ok(())
    }
}

fn main_header(meta: &RpmMetadata, compression: Compression, build_time: u32, files: FileTable) -> Vec<u8> {
    let summary = meta.summary.clone().unwrap_or_else(|| meta.name.clone());
    let description = meta.description.clone().unwrap_or_else(|| summary.clone());
    let count = files.basenames.len();

    let mut hdr = HeaderBuilder::default();
    hdr.add(RPMTAG_HEADERI18NTABLE, TagValue::StrArray(vec!["C".into()]))
        .string(RPMTAG_NAME, &meta.name)
        .string(RPMTAG_VERSION, &meta.version)
        .string(RPMTAG_RELEASE, &meta.release)
        .add(RPMTAG_SUMMARY, TagValue::I18n(summary))
        .add(RPMTAG_DESCRIPTION, TagValue::I18n(description))
        .add(RPMTAG_BUILDTIME, TagValue::Int32(vec![build_time]))
        .string(RPMTAG_BUILDHOST, &meta.build_host)
        .string(RPMTAG_LICENSE, &meta.license)
        .add(RPMTAG_GROUP, TagValue::I18n(meta.group.clone()))
        .string(RPMTAG_OS, &meta.os)
        .string(RPMTAG_ARCH, &meta.arch)
        .string(RPMTAG_SOURCERPM, &format!("{}.src.rpm", meta.nevr()))
        .string(RPMTAG_RPMVERSION, "4.0")
        .string(RPMTAG_PAYLOADFORMAT, "cpio")
        .string(RPMTAG_PAYLOADCOMPRESSOR, &compression.to_string())
        .string(RPMTAG_PAYLOADFLAGS, "9");

    if count > 0 {
        let total: u32 = files.sizes.iter().fold(0u32, |acc, s| acc.saturating_add(*s));
        hdr.add(RPMTAG_SIZE, TagValue::Int32(vec![total]))
            .add(RPMTAG_DIRNAMES, TagValue::StrArray(files.dirnames))
            .add(RPMTAG_BASENAMES, TagValue::StrArray(files.basenames))
            .add(RPMTAG_DIRINDEXES, TagValue::Int32(files.dirindexes))
            .add(RPMTAG_FILESIZES, TagValue::Int32(files.sizes))
            .add(RPMTAG_FILEMODES, TagValue::Int16(files.modes))
            .add(RPMTAG_FILERDEVS, TagValue::Int16(vec![0; count]))
            .add(RPMTAG_FILEMTIMES, TagValue::Int32(vec![build_time; count]))
            .add(RPMTAG_FILEMD5S, TagValue::StrArray(files.md5s))
            .add(RPMTAG_FILELINKTOS, TagValue::StrArray(files.linktos))
            .add(RPMTAG_FILEFLAGS, TagValue::Int32(vec![0; count]))
            .add(RPMTAG_FILEUSERNAME, TagValue::StrArray(files.users))
            .add(RPMTAG_FILEGROUPNAME, TagValue::StrArray(files.groups))
            .add(RPMTAG_FILEVERIFYFLAGS, TagValue::Int32(vec![u32::MAX; count]))
            .add(RPMTAG_FILEDEVICES, TagValue::Int32(vec![1; count]))
            .add(RPMTAG_FILEINODES, TagValue::Int32((1..=count as u32).collect()))
            .add(RPMTAG_FILELANGS, TagValue::StrArray(vec![String::new(); count]));
    }
    hdr.build()
}

fn signature(header: &[u8], payload: &[u8], payload_size: u32) -> Result<Vec<u8>, PackageError> {
    let mut context = md5::Context::new();
    context.consume(header);
    context.consume(payload);
    let digest = context.compute();
    let size = u32::try_from(header.len() + payload.len())
        .map_err(|_| PackageError::Unsupported("rpm header and payload exceed 4 GiB".into()))?;

    let mut sig = HeaderBuilder::default();
    sig.add(SIGTAG_SIZE, TagValue::Int32(vec![size]))
        .add(SIGTAG_MD5, TagValue::Bin(digest.0.to_vec()))
        .add(SIGTAG_PAYLOADSIZE, TagValue::Int32(vec![payload_size]));
    let mut bytes = sig.build();
    while bytes.len() % 8 != 0 {
        bytes.push(0);
    }
    Ok(bytes)
}

fn header_len(data: &[u8], at: usize) -> Result<usize, PackageError> {
    let fixed = data
        .get(at..at + 16)
        .ok_or_else(|| PackageError::malformed("rpm", format!("truncated header at offset {}", at)))?;
    if fixed[..3] != HEADER_MAGIC {
        return Err(PackageError::malformed("rpm", format!("bad header magic at offset {}", at)));
    }
    let be = |i: usize| u32::from_be_bytes([fixed[i], fixed[i + 1], fixed[i + 2], fixed[i + 3]]) as usize;
    Ok(16 + be(8) * 16 + be(12))
}

/// Offset of the compressed payload: after the lead, the padded signature and the main header.
pub fn payload_offset(data: &[u8]) -> Result<usize, PackageError> {
    if data.len() < LEAD_LEN || data[..4] != LEAD_MAGIC {
        return Err(PackageError::malformed("rpm", "missing lead"));
    }
    let sig_len = header_len(data, LEAD_LEN)?;
    let header_at = LEAD_LEN + sig_len + (8 - sig_len % 8) % 8;
    let end = header_at + header_len(data, header_at)?;
    if end > data.len() {
        return Err(PackageError::malformed("rpm", "header runs past end of file"));
    }
    Ok(end)
}

/// Builds a binary RPM into `out`.
pub fn build_rpm<W: Write>(
    manifest: &Manifest,
    meta: &RpmMetadata,
    options: &RpmOptions,
    mut out: W,
) -> Result<W, PackageError> {
    if options.compression == Compression::None {
        return Err(PackageError::Unsupported("rpm payloads must be compressed".into()));
    }
    let entries = archive::validate_for_write(manifest)?;
    let mtime = options.timestamp.resolve(None)?;
    let build_time = u32::try_from(mtime)
        .map_err(|_| PackageError::Unsupported(format!("timestamp {} does not fit an rpm header", mtime)))?;

    let mut cpio = CpioWriter::new(Vec::new(), mtime, true);
    let mut files = FileTable::default();
    for entry in &entries {
        let content = match &entry.kind {
            EntryKind::File { source } => source.read(&entry.dest).map_err(|e| manifest.attach_group(e))?,
            _ => Vec::new(),
        };
        files.push(entry, &content)?;
        cpio.append(entry, &content)?;
    }
    let cpio = cpio.finish()?;
    let payload_size = u32::try_from(cpio.len())
        .map_err(|_| PackageError::Unsupported("rpm payload exceeds 4 GiB".into()))?;
    let payload = compress_bytes(&cpio, options.compression, options.level)?;

    let header = main_header(meta, options.compression, build_time, files);
    let sig = signature(&header, &payload, payload_size)?;
    debug!(header = header.len(), payload = payload.len(), uncompressed = cpio.len(), "rpm sections built");

    out.write_all(&lead(meta))?;
    out.write_all(&sig)?;
    out.write_all(&header)?;
    out.write_all(&payload)?;
    info!(package = %meta.nevr(), files = entries.len(), "rpm assembled");
    Ok(out)
}

/// Builds a binary RPM and writes it atomically to `output`.
pub fn build_rpm_to_path(
    manifest: &Manifest,
    meta: &RpmMetadata,
    options: &RpmOptions,
    output: &Path,
) -> Result<(), PackageError> {
    archive::write_atomically(output, |w| {
        build_rpm(manifest, meta, options, w)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::AttrOverrides;
    use crate::manifest::{EntrySpec, ManifestGroup, ResolveOptions};

    fn manifest() -> Manifest {
        let group = ManifestGroup::new("g")
            .entry(EntrySpec::directory("usr/bin"))
            .entry(EntrySpec::inline("usr/bin/tool", "#!/bin/sh\n").with_mode("0755".parse().unwrap()))
            .entry(EntrySpec::symlink("usr/bin/t", "tool"))
            .entry(EntrySpec::inline("etc/tool.conf", "x=1\n").with_attrs(AttrOverrides {
                owner_name: Some("tool".into()),
                group: Some(50),
                ..Default::default()
            }));
        Manifest::from_groups(&[group], &ResolveOptions::default()).unwrap()
    }

    fn meta() -> RpmMetadata {
        RpmMetadata::from_json(br#"{"name": "tool", "version": "1.2"}"#).unwrap()
    }

    #[test]
    fn files_section_renders_attrs() {
        let text = files_section(&manifest()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "%attr(0644, tool, 50) \"/etc/tool.conf\"",
                "%dir %attr(0755, root, root) \"/usr/bin\"",
                "%attr(-, root, root) \"/usr/bin/t\"",
                "%attr(0755, root, root) \"/usr/bin/tool\"",
            ]
        );
    }

    #[test]
    fn prepare_spec_fills_existing_or_new_section() {
        let m = manifest();
        let spec = "Name: tool\n\n%files\n\n%changelog\n";
        let out = prepare_spec(spec, &m).unwrap();
        let files_at = out.find("%files\n").unwrap();
        assert!(out[files_at..].starts_with("%files\n%attr(0644, tool, 50)"));
        assert!(out.ends_with("%changelog\n"));

        let out = prepare_spec("Name: tool\n", &m).unwrap();
        assert!(out.starts_with("Name: tool\n\n%files\n"));
    }

    #[cfg(unix)]
    #[test]
    fn stage_buildroot_materializes_entries() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir()?;
        stage_buildroot(&manifest(), dir.path())?;
        let tool = dir.path().join("usr/bin/tool");
        assert_eq!(fs::read(&tool)?, b"#!/bin/sh\n");
        assert_eq!(fs::metadata(&tool)?.permissions().mode() & 0o7777, 0o755);
        assert_eq!(fs::read_link(dir.path().join("usr/bin/t"))?, Path::new("tool"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn stage_buildroot_fills_read_only_directories() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::unix::fs::PermissionsExt;
        let group = ManifestGroup::new("g")
            .entry(EntrySpec::directory("usr/share").with_mode("0555".parse()?))
            .entry(EntrySpec::directory("usr/share/doc").with_mode("0500".parse()?))
            .entry(EntrySpec::inline("usr/share/doc/file", "x"));
        let manifest = Manifest::from_groups(&[group], &ResolveOptions::default())?;
        let dir = tempfile::tempdir()?;
        stage_buildroot(&manifest, dir.path())?;

        let share = dir.path().join("usr/share");
        let doc = share.join("doc");
        assert_eq!(fs::metadata(&share)?.permissions().mode() & 0o7777, 0o555);
        assert_eq!(fs::metadata(&doc)?.permissions().mode() & 0o7777, 0o500);
        assert_eq!(fs::read(doc.join("file"))?, b"x");

        // Let the temporary directory clean up after itself.
        fs::set_permissions(&share, fs::Permissions::from_mode(0o755))?;
        fs::set_permissions(&doc, fs::Permissions::from_mode(0o755))?;
        Ok(())
    }

    #[test]
    fn header_index_is_sorted_and_aligned() {
        let mut hdr = HeaderBuilder::default();
        hdr.string(1001, "abc").add(1000, TagValue::Int32(vec![7])).add(1002, TagValue::Int16(vec![1, 2]));
        let bytes = hdr.build();
        assert_eq!(&bytes[..3], &HEADER_MAGIC);
        assert_eq!(u32::from_be_bytes(bytes[8..12].try_into().unwrap()), 3);
        // First index entry is tag 1000 at offset 0.
        assert_eq!(u32::from_be_bytes(bytes[16..20].try_into().unwrap()), 1000);
        assert_eq!(u32::from_be_bytes(bytes[24..28].try_into().unwrap()), 0);
        // "abc\0" follows at 4, the int16 array at 8.
        assert_eq!(u32::from_be_bytes(bytes[40..44].try_into().unwrap()), 4);
        assert_eq!(u32::from_be_bytes(bytes[56..60].try_into().unwrap()), 8);
    }

    #[test]
    fn rpm_layout_and_reproducibility() {
        let options = RpmOptions { timestamp: TimestampPolicy::Fixed(1_600_000_000), ..RpmOptions::default() };
        let a = build_rpm(&manifest(), &meta(), &options, Vec::new()).unwrap();
        let b = build_rpm(&manifest(), &meta(), &options, Vec::new()).unwrap();
        assert_eq!(a, b);

        assert_eq!(&a[..4], &LEAD_MAGIC);
        assert_eq!(&a[10..22], b"tool-1.2-1\0\0");
        assert_eq!(&a[LEAD_LEN..LEAD_LEN + 3], &HEADER_MAGIC);
        let sig_entries = u32::from_be_bytes(a[LEAD_LEN + 8..LEAD_LEN + 12].try_into().unwrap());
        let sig_store = u32::from_be_bytes(a[LEAD_LEN + 12..LEAD_LEN + 16].try_into().unwrap());
        let sig_len = 16 + sig_entries as usize * 16 + sig_store as usize;
        let header_at = LEAD_LEN + sig_len + (8 - sig_len % 8) % 8;
        assert_eq!(&a[header_at..header_at + 3], &HEADER_MAGIC);

        let payload = &a[payload_offset(&a).unwrap()..];
        assert_eq!(Compression::sniff(payload), Compression::Gzip);
        let cpio = crate::compress::decompress_bytes(payload, Compression::Gzip).unwrap();
        let records = crate::archive::cpio::read_records(&cpio).unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["./etc/tool.conf", "./usr/bin", "./usr/bin/t", "./usr/bin/tool"]);
        assert_eq!(records[2].data, b"tool");
    }

    #[test]
    fn uncompressed_payload_is_rejected() {
        let options = RpmOptions { compression: Compression::None, ..RpmOptions::default() };
        assert!(matches!(
            build_rpm(&Manifest::new(), &meta(), &options, Vec::new()),
            Err(PackageError::Unsupported(_))
        ));
    }
}
