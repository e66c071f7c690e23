//! # Path Resolver
//!
//! Turns a raw, source-relative path into an archive destination by applying a
//! strip-prefix rule and prepending the package-directory prefix. Every function
//! here is pure.
//!
//! Destinations never start with a separator and never contain `.` or `..`
//! segments. `.` segments and repeated separators are normalized away; `..` is
//! rejected, since it would let an entry escape the archive root.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::PackageError;

/// How much of the raw path is removed before it becomes a destination.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StripPrefix {
    /// The path is used as-is, keeping its structure from the declaration point.
    #[default]
    None,
    /// Strip the logical package location of the source, when the path lies under it.
    Auto,
    /// Keep only the basename.
    Flatten,
    /// Remove this exact leading path; the path must start with it.
    Explicit(String),
}

impl FromStr for StripPrefix {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" | "" => StripPrefix::None,
            "auto" => StripPrefix::Auto,
            "flatten" => StripPrefix::Flatten,
            other => StripPrefix::Explicit(other.to_string()),
        })
    }
}

impl fmt::Display for StripPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StripPrefix::None => write!(f, "none"),
            StripPrefix::Auto => write!(f, "auto"),
            StripPrefix::Flatten => write!(f, "flatten"),
            StripPrefix::Explicit(p) => write!(f, "{}", p),
        }
    }
}

/// Splits a raw path into clean components.
/// Example: "./dir1//dir2\\file.txt" becomes ["dir1", "dir2", "file.txt"]
fn components(raw: &str) -> Result<Vec<&str>, PackageError> {
    if raw.contains('\0') {
        return Err(PackageError::invalid_path(raw, "contains a NUL byte"));
    }
    let mut out = Vec::new();
    for part in raw.split(|c| c == '/' || c == '\\') {
        match part {
            "" | "." => continue,
            ".." => return Err(PackageError::invalid_path(raw, "'..' segments are not allowed")),
            p => out.push(p),
        }
    }
    Ok(out)
}

/// Normalizes a raw path: backslashes become `/`, leading separators, `./` and
/// repeated separators are dropped. The result may be empty (for `""`, `"."` or `"/"`).
pub fn normalize(raw: &str) -> Result<String, PackageError> {
    Ok(components(raw)?.join("/"))
}

/// Normalizes a package-directory prefix, so `/abc/def`, `abc/def` and `abc/def/`
/// are equivalent.
pub fn normalize_prefix(prefix: &str) -> Result<String, PackageError> {
    normalize(prefix)
}

/// Joins a normalized prefix and a normalized relative path.
pub fn join(prefix: &str, rest: &str) -> String {
    match (prefix.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{}/{}", prefix, rest),
    }
}

/// Applies a strip-prefix rule to a raw path.
///
/// `package` is the logical package location of the source and is only consulted by
/// [`StripPrefix::Auto`].
pub fn strip(raw: &str, rule: &StripPrefix, package: Option<&str>) -> Result<String, PackageError> {
    let comps = components(raw)?;
    let kept: &[&str] = match rule {
        StripPrefix::None => &comps,
        StripPrefix::Flatten => match comps.last() {
            Some(_) => &comps[comps.len() - 1..],
            None => &comps,
        },
        StripPrefix::Auto => {
            let pkg = match package {
                Some(p) => components(p)?,
                None => Vec::new(),
            };
            if !pkg.is_empty() && comps.len() > pkg.len() && comps.starts_with(&pkg) {
                &comps[pkg.len()..]
            } else {
                &comps
            }
        }
        StripPrefix::Explicit(prefix) => {
            let pre = components(prefix)?;
            if !comps.starts_with(&pre) {
                return Err(PackageError::invalid_path(
                    raw,
                    format!("does not start with strip prefix '{}'", prefix),
                ));
            }
            if comps.len() == pre.len() {
                // The prefix names the path itself: keep its basename.
                &comps[comps.len().saturating_sub(1)..]
            } else {
                &comps[pre.len()..]
            }
        }
    };
    Ok(kept.join("/"))
}

/// Resolves a raw path into an archive destination.
pub fn resolve(
    raw: &str,
    rule: &StripPrefix,
    package: Option<&str>,
    package_dir: &str,
) -> Result<String, PackageError> {
    let stripped = strip(raw, rule, package)?;
    if stripped.is_empty() {
        return Err(PackageError::invalid_path(raw, "resolves to an empty destination"));
    }
    let dest = join(&normalize_prefix(package_dir)?, &stripped);
    validate_dest(&dest)?;
    Ok(dest)
}

/// Checks the invariants of a resolved destination.
pub fn validate_dest(dest: &str) -> Result<(), PackageError> {
    if dest.is_empty() {
        return Err(PackageError::invalid_path(dest, "empty destination"));
    }
    if dest.starts_with('/') {
        return Err(PackageError::invalid_path(dest, "destination starts with a separator"));
    }
    if dest.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(PackageError::invalid_path(dest, "destination contains empty, '.' or '..' segments"));
    }
    Ok(())
}

/// Parent directory of a destination, or `None` at the archive root.
pub fn parent(dest: &str) -> Option<&str> {
    dest.rfind('/').map(|i| &dest[..i])
}

/// Last component of a destination.
pub fn basename(dest: &str) -> &str {
    match dest.rfind('/') {
        Some(i) => &dest[i + 1..],
        None => dest,
    }
}
