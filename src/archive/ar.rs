//! Common `ar` format writer, used as the outer Debian container.
//!
//! Layout: the `!<arch>\n` global header, then per member a 60-byte ASCII header
//! (name 16, mtime 12, owner 6, group 6, mode 8, size 10, terminator "`\n") followed by
//! the body, padded to an even offset with `\n`. Owner and group are always `0` and the
//! mode is `100644`. [`read_members`] parses the same layout back for listing.

use std::io::Write;

use crate::PackageError;

pub const GLOBAL_HEADER: &[u8; 8] = b"!<arch>\n";
const MEMBER_MODE: &str = "100644";

pub struct ArWriter<W: Write> {
    out: W,
    mtime: u64,
}

fn padded(value: &str, width: usize, what: &str, member: &str) -> Result<String, PackageError> {
    if value.len() > width {
        return Err(PackageError::Unsupported(format!(
            "ar member '{}': {} '{}' is wider than {} bytes",
            member, what, value, width
        )));
    }
    Ok(format!("{:<width$}", value, width = width))
}

impl<W: Write> ArWriter<W> {
    pub fn new(mut out: W, mtime: u64) -> Result<Self, PackageError> {
        out.write_all(GLOBAL_HEADER)?;
        Ok(ArWriter { out, mtime })
    }

    pub fn append(&mut self, name: &str, data: &[u8]) -> Result<(), PackageError> {
        let mut header = String::with_capacity(60);
        header.push_str(&padded(name, 16, "name", name)?);
        header.push_str(&padded(&self.mtime.to_string(), 12, "mtime", name)?);
        header.push_str(&padded("0", 6, "owner", name)?);
        header.push_str(&padded("0", 6, "group", name)?);
        header.push_str(&padded(MEMBER_MODE, 8, "mode", name)?);
        header.push_str(&padded(&data.len().to_string(), 10, "size", name)?);
        header.push_str("`\n");

        self.out.write_all(header.as_bytes())?;
        self.out.write_all(data)?;
        if data.len() % 2 == 1 {
            self.out.write_all(b"\n")?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<W, PackageError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// One member of a parsed `ar` archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArMember<'a> {
    pub name: String,
    pub mode: u32,
    pub data: &'a [u8],
}

fn header_field<'a>(header: &'a [u8], range: std::ops::Range<usize>) -> Result<&'a str, PackageError> {
    std::str::from_utf8(&header[range])
        .map(str::trim_end)
        .map_err(|_| PackageError::malformed("ar", "member header is not ASCII"))
}

/// Splits an `ar` archive into its members. GNU-style trailing `/` on names is dropped.
pub fn read_members(data: &[u8]) -> Result<Vec<ArMember<'_>>, PackageError> {
    if !data.starts_with(GLOBAL_HEADER) {
        return Err(PackageError::malformed("ar", "missing !<arch> header"));
    }
    let mut members = Vec::new();
    let mut pos = GLOBAL_HEADER.len();
    while pos < data.len() {
        let header = data
            .get(pos..pos + 60)
            .ok_or_else(|| PackageError::malformed("ar", format!("truncated member header at offset {}", pos)))?;
        if &header[58..] != b"`\n" {
            return Err(PackageError::malformed("ar", format!("bad header terminator at offset {}", pos)));
        }
        let name = header_field(header, 0..16)?.trim_end_matches('/').to_string();
        let mode = u32::from_str_radix(header_field(header, 40..48)?, 8)
            .map_err(|_| PackageError::malformed("ar", format!("bad mode for '{}'", name)))?;
        let size: usize = header_field(header, 48..58)?
            .parse()
            .map_err(|_| PackageError::malformed("ar", format!("bad size for '{}'", name)))?;
        let start = pos + 60;
        let body = data
            .get(start..start + size)
            .ok_or_else(|| PackageError::malformed("ar", format!("member '{}' is truncated", name)))?;
        members.push(ArMember { name, mode, data: body });
        pos = start + size + size % 2;
    }
    Ok(members)
}
