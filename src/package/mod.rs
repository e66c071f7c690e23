//! # Package Format Orchestrators
//!
//! Builds package containers around a merged manifest:
//! - [`deb`]: `ar` container holding `debian-binary`, a control tar and a data tar.
//! - [`rpm`]: `%files` and buildroot preparation for an external rpmbuild, plus a
//!   native writer producing lead, signature, header and a cpio payload.
//!
//! Control and spec text arrive pre-rendered; no templating happens here.

pub mod deb;
pub mod rpm;

/// Owner name written for an entry in package metadata: the symbolic name when set,
/// `root` for uid/gid 0, else the numeric id.
pub(crate) fn identity(name: &str, id: u32) -> String {
    if !name.is_empty() {
        name.to_string()
    } else if id == 0 {
        "root".to_string()
    } else {
        id.to_string()
    }
}
