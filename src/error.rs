use std::path::PathBuf;

use thiserror::Error;

/// Renders the optional group context appended to validation errors.
fn group_ctx(group: &Option<String>) -> String {
    match group {
        Some(name) => format!(" (group '{}')", name),
        None => String::new(),
    }
}

/// The primary error type for all operations in the `pkgasm` crate.
///
/// The four validation kinds (`InvalidPath`, `InvalidAttribute`, `ManifestConflict`,
/// `MissingSource`) always carry the offending destination path. Group context is
/// attached by the manifest merger through [`PackageError::in_group`].
#[derive(Debug, Error)]
pub enum PackageError {
    /// A path is malformed or escapes the archive root after resolution.
    #[error("invalid path '{path}'{}: {reason}", group_ctx(.group))]
    InvalidPath { path: String, group: Option<String>, reason: String },

    /// A malformed mode string, or an attribute that is not allowed on this entry kind.
    #[error("invalid attribute on '{path}'{}: {reason}", group_ctx(.group))]
    InvalidAttribute { path: String, group: Option<String>, reason: String },

    /// Two entries claim one destination with different kinds, or collide after normalization.
    #[error("manifest conflict at '{path}'{}: {reason}", group_ctx(.group))]
    ManifestConflict { path: String, group: Option<String>, reason: String },

    /// A declared file has no readable content source at build time.
    #[error("missing source for '{path}'{}: {} is not a readable file", group_ctx(.group), .src.display())]
    MissingSource { path: String, group: Option<String>, src: PathBuf },

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", .path.display())]
    Io { source: std::io::Error, path: PathBuf },

    /// Manifest or package metadata could not be parsed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A reproducibility epoch from the environment or a stamp file could not be parsed.
    #[error("invalid timestamp from {origin}: {value:?}")]
    InvalidTimestamp { origin: String, value: String },

    /// An archive handed to the lister is truncated or not in the format it claims.
    #[error("malformed {format} archive: {reason}")]
    Malformed { format: &'static str, reason: String },

    /// The requested output exceeds what the container format can represent.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl PackageError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        PackageError::InvalidPath { path: path.into(), group: None, reason: reason.into() }
    }

    pub fn invalid_attribute(path: impl Into<String>, reason: impl Into<String>) -> Self {
        PackageError::InvalidAttribute { path: path.into(), group: None, reason: reason.into() }
    }

    pub fn conflict(path: impl Into<String>, reason: impl Into<String>) -> Self {
        PackageError::ManifestConflict { path: path.into(), group: None, reason: reason.into() }
    }

    pub fn malformed(format: &'static str, reason: impl Into<String>) -> Self {
        PackageError::Malformed { format, reason: reason.into() }
    }

    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PackageError::Io { source, path: path.into() }
    }

    /// Attaches the name of the manifest group being merged, unless the error already has one.
    /// Nested groups report the innermost group.
    pub fn in_group(mut self, name: &str) -> Self {
        match &mut self {
            PackageError::InvalidPath { group, .. }
            | PackageError::InvalidAttribute { group, .. }
            | PackageError::ManifestConflict { group, .. }
            | PackageError::MissingSource { group, .. } => {
                if group.is_none() {
                    *group = Some(name.to_string());
                }
            }
            _ => {}
        }
        self
    }

    /// The destination path the error refers to, if it is a validation error.
    pub fn dest_path(&self) -> Option<&str> {
        match self {
            PackageError::InvalidPath { path, .. }
            | PackageError::InvalidAttribute { path, .. }
            | PackageError::ManifestConflict { path, .. }
            | PackageError::MissingSource { path, .. } => Some(path),
            _ => None,
        }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for PackageError {
    fn from(err: std::io::Error) -> Self {
        PackageError::Io { source: err, path: PathBuf::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_context_is_attached_once() {
        let err = PackageError::conflict("a/b", "file vs directory")
            .in_group("inner")
            .in_group("outer");
        assert_eq!(
            err.to_string(),
            "manifest conflict at 'a/b' (group 'inner'): file vs directory"
        );
        assert_eq!(err.dest_path(), Some("a/b"));
    }

    #[test]
    fn io_errors_ignore_group_context() {
        let err = PackageError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom")).in_group("g");
        assert!(err.dest_path().is_none());
        assert!(err.to_string().contains("boom"));
    }
}
