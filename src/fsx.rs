//! Cross-platform filesystem helpers used when a manifest is materialized on disk
//! (RPM buildroot staging).
//!
//! On Unix permission bits and symlinks map directly onto the host. On Windows
//! permission bits are not preserved and symlinks become regular files holding the
//! link target, which is what an external packager sees through a zip-style checkout.

use std::io;
use std::path::Path;

#[cfg(not(target_os = "windows"))]
/// Set POSIX permission bits on Unix.
pub fn set_unix_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(target_os = "windows"))]
/// Create `link` pointing at `target`; the target is stored verbatim.
pub fn symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(target_os = "windows")]
/// No-op on Windows: POSIX permission bits are not preserved.
pub fn set_unix_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(target_os = "windows")]
pub fn symlink(target: &str, link: &Path) -> io::Result<()> {
    std::fs::write(link, target.as_bytes())
}
