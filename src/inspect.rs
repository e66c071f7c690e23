//! # Archive Listing
//!
//! Reads back any container this crate writes and reports one line per member:
//! `mode size path [-> target]`. Tar and cpio streams may be compressed with any
//! supported filter; the filter is detected from magic bytes. A `.deb` lists its
//! `ar` members followed by the contents of `data.tar`; an `.rpm` lists its payload.

use std::fmt;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::archive::{ar, cpio};
use crate::common::{S_IFLNK, S_IFMT};
use crate::compress::{decompress_bytes, Compression};
use crate::package::rpm;
use crate::PackageError;

/// Container detected by [`list_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListedFormat {
    Tar(Compression),
    Cpio(Compression),
    Zip,
    Deb,
    Rpm(Compression),
}

impl fmt::Display for ListedFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, compression) = match self {
            ListedFormat::Tar(c) => ("tar", *c),
            ListedFormat::Cpio(c) => ("cpio", *c),
            ListedFormat::Rpm(c) => ("rpm", *c),
            ListedFormat::Zip => return f.write_str("zip"),
            ListedFormat::Deb => return f.write_str("deb"),
        };
        match compression.extension() {
            Some(ext) => write!(f, "{}.{}", name, ext),
            None => f.write_str(name),
        }
    }
}

/// One listed member. `mode` may carry file-type bits; only permissions are displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub path: String,
    pub mode: u32,
    pub size: u64,
    pub link: Option<String>,
}

impl fmt::Display for ListedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o} {:>10} {}", self.mode & 0o7777, self.size, self.path)?;
        if let Some(target) = &self.link {
            write!(f, " -> {}", target)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub format: ListedFormat,
    /// Outer container members (`ar` members of a `.deb`); empty for other formats.
    pub members: Vec<ListedEntry>,
    pub entries: Vec<ListedEntry>,
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in self.members.iter().chain(&self.entries) {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

fn list_tar(data: &[u8]) -> Result<Vec<ListedEntry>, PackageError> {
    let mut archive = ::tar::Archive::new(data);
    let mut out = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let header = entry.header();
        let link = match header.entry_type() {
            ::tar::EntryType::Symlink => {
                entry.link_name_bytes().map(|b| String::from_utf8_lossy(&b).into_owned())
            }
            _ => None,
        };
        out.push(ListedEntry {
            path: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
            mode: header.mode()?,
            size: entry.size(),
            link,
        });
    }
    Ok(out)
}

fn list_cpio(data: &[u8]) -> Result<Vec<ListedEntry>, PackageError> {
    Ok(cpio::read_records(data)?
        .into_iter()
        .map(|record| {
            let link = (record.mode & S_IFMT == S_IFLNK).then(|| String::from_utf8_lossy(record.data).into_owned());
            ListedEntry { path: record.name, mode: record.mode, size: record.data.len() as u64, link }
        })
        .collect())
}

fn list_zip(data: &[u8]) -> Result<Vec<ListedEntry>, PackageError> {
    let mut archive = ::zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| PackageError::malformed("zip", e.to_string()))?;
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| PackageError::malformed("zip", e.to_string()))?;
        let mode = file.unix_mode().unwrap_or(if file.is_dir() { 0o755 } else { 0o644 });
        let link = if mode & S_IFMT == S_IFLNK {
            let mut target = String::new();
            file.read_to_string(&mut target)?;
            Some(target)
        } else {
            None
        };
        out.push(ListedEntry { path: file.name().to_string(), mode, size: file.size(), link });
    }
    Ok(out)
}

fn list_deb(data: &[u8]) -> Result<Listing, PackageError> {
    let members = ar::read_members(data)?;
    let data_member = members
        .iter()
        .find(|m| m.name.starts_with("data.tar"))
        .ok_or_else(|| PackageError::malformed("deb", "no data.tar member"))?;
    let entries = list_tar(&decompress_bytes(data_member.data, Compression::sniff(data_member.data))?)?;
    let members = members
        .iter()
        .map(|m| ListedEntry { path: m.name.clone(), mode: m.mode, size: m.data.len() as u64, link: None })
        .collect();
    Ok(Listing { format: ListedFormat::Deb, members, entries })
}

/// Lists an in-memory archive.
pub fn list_bytes(data: &[u8]) -> Result<Listing, PackageError> {
    let simple = |format, entries| Ok(Listing { format, members: Vec::new(), entries });

    if data.starts_with(ar::GLOBAL_HEADER) {
        return list_deb(data);
    }
    if data.starts_with(b"PK\x03\x04") || data.starts_with(b"PK\x05\x06") {
        return simple(ListedFormat::Zip, list_zip(data)?);
    }
    if data.starts_with(&[0xed, 0xab, 0xee, 0xdb]) {
        let payload = &data[rpm::payload_offset(data)?..];
        let compression = Compression::sniff(payload);
        return simple(ListedFormat::Rpm(compression), list_cpio(&decompress_bytes(payload, compression)?)?);
    }

    let compression = Compression::sniff(data);
    let raw = decompress_bytes(data, compression)?;
    if raw.starts_with(b"070701") {
        simple(ListedFormat::Cpio(compression), list_cpio(&raw)?)
    } else {
        simple(ListedFormat::Tar(compression), list_tar(&raw)?)
    }
}

/// Lists the archive at `path`.
pub fn list(path: &Path) -> Result<Listing, PackageError> {
    let data = fs::read(path).map_err(|e| PackageError::io(e, path))?;
    let listing = list_bytes(&data)?;
    tracing::debug!(path = %path.display(), format = %listing.format, entries = listing.entries.len(), "archive listed");
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{self, ArchiveFormat, BuildOptions};
    use crate::manifest::{EntrySpec, Manifest, ManifestGroup, ResolveOptions};

    fn manifest() -> Manifest {
        let group = ManifestGroup::new("g")
            .entry(EntrySpec::directory("bin"))
            .entry(EntrySpec::inline("bin/tool", "#!/bin/sh\n").with_mode("0755".parse().unwrap()))
            .entry(EntrySpec::symlink("bin/t", "tool"));
        Manifest::from_groups(&[group], &ResolveOptions::default()).unwrap()
    }

    #[test]
    fn lists_compressed_tar() {
        let options = BuildOptions { compression: Some(Compression::Xz), ..Default::default() };
        let bytes = archive::build(&manifest(), ArchiveFormat::Tar, &options).unwrap();
        let listing = list_bytes(&bytes).unwrap();
        assert_eq!(listing.format, ListedFormat::Tar(Compression::Xz));
        let lines: Vec<String> = listing.entries.iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            [
                "0755          0 bin/",
                "0777          0 bin/t -> tool",
                "0755         10 bin/tool",
            ]
        );
    }

    #[test]
    fn lists_zip_and_cpio() {
        let m = manifest();
        let zip = archive::build(&m, ArchiveFormat::Zip, &BuildOptions::default()).unwrap();
        let listing = list_bytes(&zip).unwrap();
        assert_eq!(listing.format, ListedFormat::Zip);
        assert_eq!(listing.entries[1].link.as_deref(), Some("tool"));

        let cpio = archive::build(&m, ArchiveFormat::Cpio, &BuildOptions::default()).unwrap();
        let listing = list_bytes(&cpio).unwrap();
        assert_eq!(listing.format, ListedFormat::Cpio(Compression::None));
        assert_eq!(listing.entries.len(), 3);
        assert_eq!(listing.entries[2].size, 10);
    }

    #[test]
    fn garbage_is_reported_as_malformed() {
        assert!(list_bytes(b"!<arch>\nshort").is_err());
        assert!(list_bytes(&[0xed, 0xab, 0xee, 0xdb, 0, 0]).is_err());
    }
}
