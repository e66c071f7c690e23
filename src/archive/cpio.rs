//! SVR4 `newc` cpio serialization (magic `070701`, no checksum).
//!
//! Each record is a 110-byte ASCII header of 8-digit hex fields, the NUL-terminated
//! name, padding to 4 bytes, then the body padded to 4 bytes. Inode numbers are
//! assigned sequentially from 1. Symlink bodies hold the link target. The archive
//! ends with a `TRAILER!!!` record. [`read_records`] parses a newc stream back.

use std::io::Write;

use super::EntryWriter;
use crate::common::{Entry, EntryKind};
use crate::PackageError;

const MAGIC: &str = "070701";
const HEADER_LEN: usize = 110;
const TRAILER: &str = "TRAILER!!!";

/// One newc header. Fields not listed (device numbers, checksum) are written as zero.
#[derive(Debug, Clone, Default)]
struct RecordHeader {
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    mtime: u32,
    filesize: u32,
}

pub struct CpioWriter<W: Write> {
    out: W,
    next_inode: u32,
    mtime: u64,
    dot_root: bool,
}

fn pad4(len: u64) -> usize {
    ((4 - (len % 4)) % 4) as usize
}

fn field(value: u64, what: &str, dest: &str) -> Result<u32, PackageError> {
    u32::try_from(value)
        .map_err(|_| PackageError::Unsupported(format!("{} of '{}' does not fit a cpio header field", what, dest)))
}

impl<W: Write> CpioWriter<W> {
    /// With `dot_root`, member names are prefixed with `./` (RPM payload convention).
    pub fn new(out: W, mtime: u64, dot_root: bool) -> Self {
        CpioWriter { out, next_inode: 1, mtime, dot_root }
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), PackageError> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    fn pad(&mut self, len: u64) -> Result<(), PackageError> {
        let n = pad4(len);
        if n > 0 {
            self.put(&[0u8; 3][..n])?;
        }
        Ok(())
    }

    fn record(&mut self, name: &str, header: &RecordHeader, body: &[u8]) -> Result<(), PackageError> {
        let namesize = name.len() + 1;
        let text = format!(
            "{MAGIC}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}{:08X}",
            self.next_inode,
            header.mode,
            header.uid,
            header.gid,
            header.nlink,
            header.mtime,
            header.filesize,
            0, // devmajor
            0, // devminor
            0, // rdevmajor
            0, // rdevminor
            namesize,
            0, // check
        );
        debug_assert_eq!(text.len(), HEADER_LEN);
        self.next_inode += 1;

        self.put(text.as_bytes())?;
        self.put(name.as_bytes())?;
        self.put(&[0])?;
        self.pad((HEADER_LEN + namesize) as u64)?;
        if !body.is_empty() {
            self.put(body)?;
            self.pad(body.len() as u64)?;
        }
        Ok(())
    }

    /// Writes the trailer record and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, PackageError> {
        let trailer = RecordHeader { nlink: 1, ..Default::default() };
        self.record(TRAILER, &trailer, &[])?;
        Ok(self.out)
    }
}

impl<W: Write> EntryWriter for CpioWriter<W> {
    fn append(&mut self, entry: &Entry, content: &[u8]) -> Result<(), PackageError> {
        let body: &[u8] = match &entry.kind {
            EntryKind::File { .. } => content,
            EntryKind::Directory { .. } => &[],
            EntryKind::Symlink { target } => target.as_bytes(),
        };
        let header = RecordHeader {
            mode: entry.full_mode(),
            uid: entry.attrs.uid,
            gid: entry.attrs.gid,
            nlink: if entry.is_dir() { 2 } else { 1 },
            mtime: field(self.mtime, "mtime", &entry.dest)?,
            filesize: field(body.len() as u64, "size", &entry.dest)?,
        };
        let name = if self.dot_root { format!("./{}", entry.dest) } else { entry.dest.clone() };
        self.record(&name, &header, body)
    }
}

/// One record of a parsed newc archive. `data` is the file body or link target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpioRecord<'a> {
    pub name: String,
    pub mode: u32,
    pub data: &'a [u8],
}

/// Parses a newc archive up to its trailer.
pub fn read_records(data: &[u8]) -> Result<Vec<CpioRecord<'_>>, PackageError> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    loop {
        let header = data
            .get(pos..pos + HEADER_LEN)
            .ok_or_else(|| PackageError::malformed("cpio", format!("truncated header at offset {}", pos)))?;
        if &header[..6] != MAGIC.as_bytes() {
            return Err(PackageError::malformed("cpio", format!("bad magic at offset {}", pos)));
        }
        let hex = |index: usize| -> Result<usize, PackageError> {
            let start = 6 + index * 8;
            std::str::from_utf8(&header[start..start + 8])
                .ok()
                .and_then(|t| usize::from_str_radix(t, 16).ok())
                .ok_or_else(|| PackageError::malformed("cpio", format!("bad header field at offset {}", pos)))
        };
        let mode = hex(1)? as u32;
        let filesize = hex(6)?;
        let namesize = hex(11)?;

        let name_start = pos + HEADER_LEN;
        let name = data
            .get(name_start..name_start + namesize)
            .ok_or_else(|| PackageError::malformed("cpio", "truncated name"))?;
        let name = String::from_utf8_lossy(name.strip_suffix(&[0u8]).unwrap_or(name)).into_owned();
        let body_start = name_start + namesize + pad4((HEADER_LEN + namesize) as u64);
        if name == TRAILER {
            return Ok(records);
        }
        let body = data
            .get(body_start..body_start + filesize)
            .ok_or_else(|| PackageError::malformed("cpio", format!("'{}' is truncated", name)))?;
        records.push(CpioRecord { name, mode, data: body });
        pos = body_start + filesize + pad4(filesize as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::{Attributes, Mode};
    use crate::common::ContentSource;

    fn hex(bytes: &[u8], index: usize) -> u32 {
        let start = 6 + index * 8;
        let text = std::str::from_utf8(&bytes[start..start + 8]).unwrap();
        u32::from_str_radix(text, 16).unwrap()
    }

    #[test]
    fn empty_archive_is_only_trailer() {
        let bytes = CpioWriter::new(Vec::new(), 0, false).finish().unwrap();
        // 110 + "TRAILER!!!\0" (11) = 121, padded to 124
        assert_eq!(bytes.len(), 124);
        assert_eq!(&bytes[..6], b"070701");
        assert_eq!(&bytes[110..120], b"TRAILER!!!");
    }

    #[test]
    fn records_are_aligned_and_numbered() {
        let mut writer = CpioWriter::new(Vec::new(), 946_684_800, true);
        let file = Entry {
            dest: "a".into(),
            kind: EntryKind::File { source: ContentSource::Bytes(b"hello".to_vec()) },
            attrs: Attributes { mode: Mode::new(0o640).unwrap(), uid: 7, ..Attributes::default() },
        };
        writer.append(&file, b"hello").unwrap();
        let dir = Entry {
            dest: "d".into(),
            kind: EntryKind::Directory { empty: true },
            attrs: Attributes { mode: Mode::new(0o755).unwrap(), ..Attributes::default() },
        };
        writer.append(&dir, &[]).unwrap();
        let bytes = writer.finish().unwrap();

        assert_eq!(hex(&bytes, 0), 1); // inode
        assert_eq!(hex(&bytes, 1), 0o100640);
        assert_eq!(hex(&bytes, 2), 7);
        assert_eq!(hex(&bytes, 5), 946_684_800);
        assert_eq!(hex(&bytes, 6), 5);
        assert_eq!(hex(&bytes, 11), 4); // "./a\0"
        assert_eq!(&bytes[110..113], b"./a");
        // header+name = 114 -> 116, body 5 -> 8
        let second = 116 + 8;
        assert_eq!(&bytes[second..second + 6], b"070701");
        assert_eq!(hex(&bytes[second..], 0), 2);
        assert_eq!(hex(&bytes[second..], 4), 2); // nlink
        assert_eq!(bytes.len() % 4, 0);

        let records = read_records(&bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "./a");
        assert_eq!(records[0].data, b"hello");
        assert_eq!(records[1].mode, 0o040755);
    }

    #[test]
    fn reader_requires_trailer() {
        let bytes = CpioWriter::new(Vec::new(), 0, false).finish().unwrap();
        assert!(read_records(&bytes).unwrap().is_empty());
        assert!(read_records(&bytes[..100]).is_err());
    }
}
