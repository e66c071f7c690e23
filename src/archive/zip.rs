//! Zip serialization.
//!
//! Each member is written as local file header, body, data descriptor (general purpose
//! bit 3), followed at the end by the central directory and the end-of-central-directory
//! record. Unix type and permission bits live in the high 16 bits of the external
//! attributes; "version made by" declares Unix so readers honor them.
//!
//! Symlinks are stored as regular members whose body is the link target and whose
//! external attributes carry `S_IFLNK`.
//!
//! No zip64: more than 65535 members or any size or offset beyond 4 GiB fails with
//! `Unsupported`.

use std::borrow::Cow;
use std::io::Write;

use chrono::{DateTime, Datelike, Timelike};
use flate2::write::DeflateEncoder;

use super::EntryWriter;
use crate::common::{Entry, EntryKind};
use crate::timestamp::ZIP_EPOCH_FLOOR;
use crate::PackageError;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;

const VERSION_NEEDED: u16 = 20;
/// Unix host, spec version 2.0.
const VERSION_MADE_BY: u16 = (3 << 8) | 20;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
const FLAG_UTF8: u16 = 0x0800;
const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const DOS_DIRECTORY_ATTR: u32 = 0x10;
const MAX_ENTRIES: usize = u16::MAX as usize;
/// 2107-12-31T23:59:58Z, the last instant a DOS date-time can hold.
const DOS_MAX: u64 = 4_354_819_198;

struct CentralRecord {
    name: Vec<u8>,
    flags: u16,
    method: u16,
    crc: u32,
    compressed_size: u32,
    size: u32,
    external_attrs: u32,
    offset: u32,
}

pub struct ZipWriter<W: Write> {
    out: W,
    written: u64,
    time: u16,
    date: u16,
    /// Deflate level; `None` stores every member.
    level: Option<u32>,
    records: Vec<CentralRecord>,
}

/// Converts a timestamp to DOS (time, date), clamped to the representable range.
pub fn dos_datetime(ts: u64) -> (u16, u16) {
    let ts = ts.clamp(ZIP_EPOCH_FLOOR, DOS_MAX);
    match DateTime::from_timestamp(ts as i64, 0) {
        Some(dt) => {
            let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
            let date = (((dt.year() - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
            (time, date)
        }
        // 1980-01-01 00:00:00
        None => (0, (1 << 5) | 1),
    }
}

fn to_u32(value: u64, what: &str, dest: &str) -> Result<u32, PackageError> {
    u32::try_from(value)
        .map_err(|_| PackageError::Unsupported(format!("{} of '{}' exceeds 4 GiB; zip64 is not supported", what, dest)))
}

impl<W: Write> ZipWriter<W> {
    pub fn new(out: W, mtime: u64, level: Option<u32>) -> Self {
        let (time, date) = dos_datetime(mtime);
        ZipWriter { out, written: 0, time, date, level, records: Vec::new() }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), PackageError> {
        self.out.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn put_u16(&mut self, v: u16) -> Result<(), PackageError> {
        self.put(&v.to_le_bytes())
    }

    fn put_u32(&mut self, v: u32) -> Result<(), PackageError> {
        self.put(&v.to_le_bytes())
    }

    fn deflate(&self, data: &[u8]) -> Result<Option<Vec<u8>>, PackageError> {
        let Some(level) = self.level else { return Ok(None) };
        if data.is_empty() {
            return Ok(None);
        }
        let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::new(level));
        encoder.write_all(data)?;
        let deflated = encoder.finish()?;
        Ok((deflated.len() < data.len()).then_some(deflated))
    }

    /// Writes the central directory and end record, returning the underlying writer.
    pub fn finish(mut self) -> Result<W, PackageError> {
        let cd_offset = to_u32(self.written, "central directory offset", "")?;
        let records = std::mem::take(&mut self.records);
        for r in &records {
            self.put_u32(CENTRAL_HEADER_SIG)?;
            self.put_u16(VERSION_MADE_BY)?;
            self.put_u16(VERSION_NEEDED)?;
            self.put_u16(r.flags)?;
            self.put_u16(r.method)?;
            self.put_u16(self.time)?;
            self.put_u16(self.date)?;
            self.put_u32(r.crc)?;
            self.put_u32(r.compressed_size)?;
            self.put_u32(r.size)?;
            self.put_u16(r.name.len() as u16)?;
            self.put_u16(0)?; // extra
            self.put_u16(0)?; // comment
            self.put_u16(0)?; // disk
            self.put_u16(0)?; // internal attributes
            self.put_u32(r.external_attrs)?;
            self.put_u32(r.offset)?;
            self.put(&r.name)?;
        }
        let cd_size = to_u32(self.written - cd_offset as u64, "central directory size", "")?;
        let count = records.len() as u16;

        self.put_u32(END_OF_CENTRAL_DIR_SIG)?;
        self.put_u16(0)?;
        self.put_u16(0)?;
        self.put_u16(count)?;
        self.put_u16(count)?;
        self.put_u32(cd_size)?;
        self.put_u32(cd_offset)?;
        self.put_u16(0)?;
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> EntryWriter for ZipWriter<W> {
    fn append(&mut self, entry: &Entry, content: &[u8]) -> Result<(), PackageError> {
        if self.records.len() >= MAX_ENTRIES {
            return Err(PackageError::Unsupported(format!(
                "more than {} zip members; zip64 is not supported",
                MAX_ENTRIES
            )));
        }

        let mut name = entry.dest.clone().into_bytes();
        let body: &[u8] = match &entry.kind {
            EntryKind::File { .. } => content,
            EntryKind::Directory { .. } => {
                name.push(b'/');
                &[]
            }
            EntryKind::Symlink { target } => target.as_bytes(),
        };
        if name.len() > u16::MAX as usize {
            return Err(PackageError::invalid_path(entry.dest.clone(), "name is too long for a zip header"));
        }

        let crc = crc32fast::hash(body);
        let (method, stored): (u16, Cow<[u8]>) = match self.deflate(body)? {
            Some(deflated) => (METHOD_DEFLATED, Cow::Owned(deflated)),
            None => (METHOD_STORED, Cow::Borrowed(body)),
        };
        let size = to_u32(body.len() as u64, "size", &entry.dest)?;
        let compressed_size = to_u32(stored.len() as u64, "compressed size", &entry.dest)?;
        let offset = to_u32(self.written, "offset", &entry.dest)?;

        let mut flags = FLAG_DATA_DESCRIPTOR;
        if !name.is_ascii() {
            flags |= FLAG_UTF8;
        }
        let mut external_attrs = entry.full_mode() << 16;
        if entry.is_dir() {
            external_attrs |= DOS_DIRECTORY_ATTR;
        }

        self.put_u32(LOCAL_HEADER_SIG)?;
        self.put_u16(VERSION_NEEDED)?;
        self.put_u16(flags)?;
        self.put_u16(method)?;
        self.put_u16(self.time)?;
        self.put_u16(self.date)?;
        self.put_u32(0)?; // crc, sizes follow in the data descriptor
        self.put_u32(0)?;
        self.put_u32(0)?;
        self.put_u16(name.len() as u16)?;
        self.put_u16(0)?;
        self.put(&name)?;
        self.put(&stored)?;

        self.put_u32(DATA_DESCRIPTOR_SIG)?;
        self.put_u32(crc)?;
        self.put_u32(compressed_size)?;
        self.put_u32(size)?;

        self.records.push(CentralRecord { name, flags, method, crc, compressed_size, size, external_attrs, offset });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{Attributes, Mode};
    use crate::common::ContentSource;
    use std::io::{Cursor, Read};

    fn write(entries: &[Entry], mtime: u64, level: Option<u32>) -> Vec<u8> {
        let mut writer = ZipWriter::new(Vec::new(), mtime, level);
        for e in entries {
            let content = match &e.kind {
                EntryKind::File { source } => source.read(&e.dest).unwrap(),
                _ => Vec::new(),
            };
            writer.append(e, &content).unwrap();
        }
        writer.finish().unwrap()
    }

    fn entry(dest: &str, kind: EntryKind, mode: u32) -> Entry {
        Entry { dest: dest.into(), kind, attrs: Attributes { mode: Mode::new(mode).unwrap(), ..Attributes::default() } }
    }

    #[test]
    fn empty_zip_is_only_end_record() {
        let bytes = write(&[], 0, Some(6));
        assert_eq!(bytes.len(), 22);
        assert_eq!(&bytes[..4], &END_OF_CENTRAL_DIR_SIG.to_le_bytes());
    }

    #[test]
    fn dos_datetime_clamps_and_encodes() {
        // 2000-01-01 00:00:00
        assert_eq!(dos_datetime(946_684_800), (0, (20 << 9) | (1 << 5) | 1));
        assert_eq!(dos_datetime(0), dos_datetime(ZIP_EPOCH_FLOOR));
        assert_eq!(dos_datetime(u64::MAX), dos_datetime(DOS_MAX));
        // Odd seconds round down.
        assert_eq!(dos_datetime(ZIP_EPOCH_FLOOR + 3).0, 1);
    }

    #[test]
    fn members_read_back_with_modes() -> Result<(), Box<dyn std::error::Error>> {
        let text = b"repeated text ".repeat(50);
        let entries = vec![
            entry("bin", EntryKind::Directory { empty: false }, 0o755),
            entry("bin/run", EntryKind::File { source: ContentSource::Bytes(text.clone()) }, 0o755),
            entry("bin/sh", EntryKind::Symlink { target: "run".into() }, 0o777),
        ];
        let bytes = write(&entries, 946_684_800, Some(6));
        let mut archive = ::zip::ZipArchive::new(Cursor::new(bytes))?;
        assert_eq!(archive.len(), 3);

        let dir = archive.by_index(0)?;
        assert_eq!(dir.name(), "bin/");
        assert!(dir.is_dir());
        assert_eq!(dir.unix_mode(), Some(0o040755));
        drop(dir);

        let mut run = archive.by_name("bin/run")?;
        assert_eq!(run.compression(), ::zip::CompressionMethod::Deflated);
        assert_eq!(run.unix_mode(), Some(0o100755));
        let mut body = Vec::new();
        run.read_to_end(&mut body)?;
        assert_eq!(body, text);
        drop(run);

        let mut link = archive.by_name("bin/sh")?;
        assert_eq!(link.unix_mode(), Some(0o120777));
        let mut target = String::new();
        link.read_to_string(&mut target)?;
        assert_eq!(target, "run");
        Ok(())
    }

    #[test]
    fn store_mode_keeps_bodies_verbatim() -> Result<(), Box<dyn std::error::Error>> {
        let body = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_vec();
        let entries = vec![entry("a.txt", EntryKind::File { source: ContentSource::Bytes(body.clone()) }, 0o644)];
        let bytes = write(&entries, 946_684_800, None);
        let mut archive = ::zip::ZipArchive::new(Cursor::new(bytes))?;
        let file = archive.by_index(0)?;
        assert_eq!(file.compression(), ::zip::CompressionMethod::Stored);
        assert_eq!(file.compressed_size(), body.len() as u64);
        Ok(())
    }
}
