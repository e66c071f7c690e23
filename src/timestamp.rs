//! # Deterministic Metadata Normalizer
//!
//! Computes the single modification time stamped on every entry of one archive build.
//! File mtimes on disk and the wall clock never leak into the output.
//!
//! ## Policies
//! - [`TimestampPolicy::Fixed`]: a caller-supplied epoch.
//! - [`TimestampPolicy::Portable`]: [`PORTABLE_MTIME`] (2000-01-01T00:00:00Z).
//! - [`TimestampPolicy::SourceProvided`]: an externally supplied reproducibility epoch,
//!   taken from the policy itself, a stamp file, or `SOURCE_DATE_EPOCH`, in that order.
//!   Falls back to the portable value when none is present.
//!
//! Formats that cannot represent early dates pass a floor to [`TimestampPolicy::resolve`];
//! values below it are raised to it, never rejected.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::PackageError;

/// 2000-01-01T00:00:00Z.
pub const PORTABLE_MTIME: u64 = 946_684_800;

/// 1980-01-01T00:00:00Z, the earliest instant a DOS date-time can hold.
pub const ZIP_EPOCH_FLOOR: u64 = 315_532_800;

pub const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";

/// Keys recognized in `KEY VALUE` stamp files.
const STAMP_KEYS: [&str; 2] = ["BUILD_TIMESTAMP", "SOURCE_DATE_EPOCH"];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    Fixed(u64),
    #[default]
    Portable,
    SourceProvided {
        epoch: Option<u64>,
        stamp_file: Option<PathBuf>,
    },
}

impl TimestampPolicy {
    /// Resolves the policy, consulting `SOURCE_DATE_EPOCH` from the process environment
    /// when the policy is source-provided.
    pub fn resolve(&self, floor: Option<u64>) -> Result<u64, PackageError> {
        self.resolve_with_env(floor, std::env::var(SOURCE_DATE_EPOCH_ENV).ok())
    }

    /// Same as [`resolve`](Self::resolve) with the environment value passed in.
    pub fn resolve_with_env(&self, floor: Option<u64>, env_epoch: Option<String>) -> Result<u64, PackageError> {
        let base = match self {
            TimestampPolicy::Fixed(ts) => *ts,
            TimestampPolicy::Portable => PORTABLE_MTIME,
            TimestampPolicy::SourceProvided { epoch, stamp_file } => {
                source_epoch(*epoch, stamp_file.as_deref(), env_epoch)?.unwrap_or(PORTABLE_MTIME)
            }
        };
        let ts = apply_floor(base, floor);
        if ts != base {
            debug!(requested = base, floor = ?floor, "timestamp raised to format floor");
        }
        info!(mtime = ts, policy = ?self, "resolved archive timestamp");
        Ok(ts)
    }
}

/// Raises `ts` to `floor` when it is below it.
pub fn apply_floor(ts: u64, floor: Option<u64>) -> u64 {
    match floor {
        Some(f) => ts.max(f),
        None => ts,
    }
}

/// Picks the reproducibility epoch: explicit value first, then the stamp file, then the
/// environment value.
pub fn source_epoch(
    explicit: Option<u64>,
    stamp_file: Option<&Path>,
    env_epoch: Option<String>,
) -> Result<Option<u64>, PackageError> {
    if let Some(ts) = explicit {
        return Ok(Some(ts));
    }
    if let Some(path) = stamp_file {
        return read_stamp_file(path).map(Some);
    }
    match env_epoch {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse::<u64>().map(Some).map_err(|_| {
            PackageError::InvalidTimestamp { origin: SOURCE_DATE_EPOCH_ENV.to_string(), value: raw }
        }),
        _ => Ok(None),
    }
}

/// Reads a stamp file holding a bare integer or `KEY VALUE` lines.
pub fn read_stamp_file(path: &Path) -> Result<u64, PackageError> {
    let text = fs::read_to_string(path).map_err(|e| PackageError::io(e, path))?;
    parse_stamp(&text).ok_or_else(|| PackageError::InvalidTimestamp {
        origin: path.display().to_string(),
        value: text.lines().next().unwrap_or_default().to_string(),
    })
}

fn parse_stamp(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if let Ok(ts) = trimmed.parse::<u64>() {
        return Some(ts);
    }
    text.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(key), Some(value)) if STAMP_KEYS.contains(&key) => value.parse().ok(),
            _ => None,
        }
    })
}
