//! # Compression Filters
//!
//! Streaming compression applied to a fully serialized container (tar, cpio) or to the
//! members of a package. Every encoder is configured so that identical input bytes
//! produce identical output bytes:
//! - gzip headers carry mtime 0, no file name and OS byte 255;
//! - xz and zstd run single-threaded.

use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use flate2::GzBuilder;
use serde::{Deserialize, Serialize};
use xz2::write::XzEncoder;

use crate::PackageError;

/// Defines the available compression filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// File extension appended after the container extension (`tar.gz`).
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gz"),
            Compression::Bzip2 => Some("bz2"),
            Compression::Xz => Some("xz"),
            Compression::Zstd => Some("zst"),
        }
    }

    pub fn from_extension(ext: &str) -> Option<Compression> {
        match ext.to_ascii_lowercase().as_str() {
            "gz" | "gzip" => Some(Compression::Gzip),
            "bz2" | "bzip2" => Some(Compression::Bzip2),
            "xz" | "lzma" => Some(Compression::Xz),
            "zst" | "zstd" => Some(Compression::Zstd),
            _ => None,
        }
    }

    pub fn default_level(self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Gzip | Compression::Bzip2 => 9,
            Compression::Xz => 6,
            Compression::Zstd => 19,
        }
    }

    fn level_range(self) -> (u32, u32) {
        match self {
            Compression::None => (0, 0),
            Compression::Gzip | Compression::Xz => (0, 9),
            Compression::Bzip2 => (1, 9),
            Compression::Zstd => (1, 22),
        }
    }

    /// Identifies a compressed stream by its magic bytes. Anything unrecognized is
    /// taken to be uncompressed.
    pub fn sniff(data: &[u8]) -> Compression {
        if data.starts_with(&[0x1f, 0x8b]) {
            Compression::Gzip
        } else if data.starts_with(b"BZh") {
            Compression::Bzip2
        } else if data.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Compression::Xz
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }

    /// Validates an optional caller level, falling back to [`default_level`](Self::default_level).
    pub fn level(self, requested: Option<u32>) -> Result<u32, PackageError> {
        let Some(level) = requested else {
            return Ok(self.default_level());
        };
        let (lo, hi) = self.level_range();
        if self != Compression::None && (level < lo || level > hi) {
            return Err(PackageError::Unsupported(format!(
                "{} level {} is outside {}..={}",
                self, level, lo, hi
            )));
        }
        Ok(level)
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "store" | "" => Ok(Compression::None),
            other => Compression::from_extension(other).ok_or_else(|| {
                format!("unknown compression '{}' (expected none, gzip, bzip2, xz or zstd)", s)
            }),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Xz => "xz",
            Compression::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

/// A writer that compresses everything written through it with the chosen filter.
/// [`finish`](CompressedWriter::finish) must be called to flush trailers.
pub enum CompressedWriter<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Bzip2(BzEncoder<W>),
    Xz(XzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> CompressedWriter<W> {
    pub fn new(inner: W, compression: Compression, level: Option<u32>) -> Result<Self, PackageError> {
        let level = compression.level(level)?;
        Ok(match compression {
            Compression::None => CompressedWriter::Plain(inner),
            Compression::Gzip => CompressedWriter::Gzip(
                GzBuilder::new()
                    .mtime(0)
                    .operating_system(255)
                    .write(inner, flate2::Compression::new(level)),
            ),
            Compression::Bzip2 => CompressedWriter::Bzip2(BzEncoder::new(inner, bzip2::Compression::new(level))),
            Compression::Xz => CompressedWriter::Xz(XzEncoder::new(inner, level)),
            Compression::Zstd => CompressedWriter::Zstd(zstd::stream::write::Encoder::new(inner, level as i32)?),
        })
    }

    /// Writes the stream trailer and returns the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            CompressedWriter::Plain(w) => Ok(w),
            CompressedWriter::Gzip(e) => e.finish(),
            CompressedWriter::Bzip2(e) => e.finish(),
            CompressedWriter::Xz(e) => e.finish(),
            CompressedWriter::Zstd(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for CompressedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressedWriter::Plain(w) => w.write(buf),
            CompressedWriter::Gzip(e) => e.write(buf),
            CompressedWriter::Bzip2(e) => e.write(buf),
            CompressedWriter::Xz(e) => e.write(buf),
            CompressedWriter::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressedWriter::Plain(w) => w.flush(),
            CompressedWriter::Gzip(e) => e.flush(),
            CompressedWriter::Bzip2(e) => e.flush(),
            CompressedWriter::Xz(e) => e.flush(),
            CompressedWriter::Zstd(e) => e.flush(),
        }
    }
}

/// Compresses an in-memory buffer in one go.
pub fn compress_bytes(data: &[u8], compression: Compression, level: Option<u32>) -> Result<Vec<u8>, PackageError> {
    let mut writer = CompressedWriter::new(Vec::new(), compression, level)?;
    writer.write_all(data)?;
    Ok(writer.finish()?)
}

/// Decodes an in-memory buffer compressed with `compression`.
pub fn decompress_bytes(data: &[u8], compression: Compression) -> Result<Vec<u8>, PackageError> {
    let mut out = Vec::with_capacity(data.len() * 2);
    match compression {
        Compression::None => out.extend_from_slice(data),
        Compression::Gzip => {
            flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
        }
        Compression::Bzip2 => {
            bzip2::read::BzDecoder::new(data).read_to_end(&mut out)?;
        }
        Compression::Xz => {
            xz2::read::XzDecoder::new(data).read_to_end(&mut out)?;
        }
        Compression::Zstd => {
            zstd::stream::read::Decoder::new(data)?.read_to_end(&mut out)?;
        }
    }
    Ok(out)
}
