//! GNU tar serialization.
//!
//! Headers are filled field by field on `tar::Header::new_gnu()`; names longer than the
//! 100-byte header field are carried in a preceding `././@LongLink` record, the way
//! GNU tar does it. Directory names end in `/`.

use std::io::Write;

use ::tar::{Builder, EntryType, Header};

use super::EntryWriter;
use crate::attrs::{Attributes, DEFAULT_DIR_MODE};
use crate::common::{Entry, EntryKind};
use crate::PackageError;

const NAME_FIELD_LEN: usize = 100;
const LONG_LINK_NAME: &[u8] = b"././@LongLink";

pub struct TarWriter<W: Write> {
    builder: Builder<W>,
    mtime: u64,
    dot_root: bool,
}

impl<W: Write> TarWriter<W> {
    /// With `dot_root`, a `./` directory record is written first and every member name
    /// is prefixed with `./`.
    pub fn new(out: W, mtime: u64, dot_root: bool) -> Result<Self, PackageError> {
        let mut writer = TarWriter { builder: Builder::new(out), mtime, dot_root };
        if dot_root {
            let root = Attributes { mode: DEFAULT_DIR_MODE, ..Attributes::default() };
            let header = writer.header(EntryType::Directory, &root, 0)?;
            writer.append_named(header, "./", None, &[])?;
        }
        Ok(writer)
    }

    /// Writes the end-of-archive marker and returns the underlying writer.
    pub fn finish(self) -> Result<W, PackageError> {
        Ok(self.builder.into_inner()?)
    }

    fn header(&self, kind: EntryType, attrs: &Attributes, size: u64) -> Result<Header, PackageError> {
        let mut header = Header::new_gnu();
        header.set_entry_type(kind);
        header.set_mode(attrs.mode.bits());
        header.set_uid(attrs.uid as u64);
        header.set_gid(attrs.gid as u64);
        header.set_size(size);
        header.set_mtime(self.mtime);
        header.set_username(&attrs.owner_name)?;
        header.set_groupname(&attrs.group_name)?;
        Ok(header)
    }

    fn member_name(&self, entry: &Entry) -> String {
        let mut name = if self.dot_root { format!("./{}", entry.dest) } else { entry.dest.clone() };
        if entry.is_dir() {
            name.push('/');
        }
        name
    }

    fn append_long(&mut self, kind: EntryType, value: &str) -> Result<(), PackageError> {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        let mut header = Header::new_gnu();
        copy_field(&mut header.as_old_mut().name, LONG_LINK_NAME);
        header.set_entry_type(kind);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_size(data.len() as u64);
        header.set_cksum();
        self.builder.append(&header, &data[..])?;
        Ok(())
    }

    fn append_named(&mut self, mut header: Header, name: &str, link: Option<&str>, data: &[u8]) -> Result<(), PackageError> {
        if name.len() > NAME_FIELD_LEN {
            self.append_long(EntryType::GNULongName, name)?;
        }
        copy_field(&mut header.as_old_mut().name, name.as_bytes());
        if let Some(target) = link {
            if target.len() > NAME_FIELD_LEN {
                self.append_long(EntryType::GNULongLink, target)?;
            }
            copy_field(&mut header.as_old_mut().linkname, target.as_bytes());
        }
        header.set_cksum();
        self.builder.append(&header, data)?;
        Ok(())
    }
}

/// Copies as much of `value` as fits; the rest of the field stays NUL.
fn copy_field(field: &mut [u8; NAME_FIELD_LEN], value: &[u8]) {
    let n = value.len().min(NAME_FIELD_LEN);
    field[..n].copy_from_slice(&value[..n]);
}

impl<W: Write> EntryWriter for TarWriter<W> {
    fn append(&mut self, entry: &Entry, content: &[u8]) -> Result<(), PackageError> {
        let name = self.member_name(entry);
        match &entry.kind {
            EntryKind::File { .. } => {
                let header = self.header(EntryType::Regular, &entry.attrs, content.len() as u64)?;
                self.append_named(header, &name, None, content)
            }
            EntryKind::Directory { .. } => {
                let header = self.header(EntryType::Directory, &entry.attrs, 0)?;
                self.append_named(header, &name, None, &[])
            }
            EntryKind::Symlink { target } => {
                let header = self.header(EntryType::Symlink, &entry.attrs, 0)?;
                self.append_named(header, &name, Some(target), &[])
            }
        }
    }
}
