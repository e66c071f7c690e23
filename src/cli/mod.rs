use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::archive::ArchiveFormat;
use crate::compress::Compression;
use crate::paths::StripPrefix;
use crate::timestamp::TimestampPolicy;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Raise the default log level to debug. PKGASM_LOG or RUST_LOG still take precedence.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit log events as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Where entries come from and how their destinations are resolved.
#[derive(ClapArgs, Clone, Debug)]
pub struct ManifestArgs {
    /// JSON manifest documents, merged in the order given (later declarations win).
    #[arg(short, long = "manifest", required_unless_present = "tree")]
    pub manifests: Vec<PathBuf>,

    /// Add every file, directory and symlink under this directory as one more group.
    #[arg(long)]
    pub tree: Option<PathBuf>,

    /// Strip rule for raw paths: none, auto, flatten, or an explicit leading path.
    #[arg(long, default_value = "none")]
    pub strip_prefix: StripPrefix,

    /// Directory prefix prepended to every destination.
    #[arg(long, default_value = "")]
    pub package_dir: String,

    /// Base directory for relative `src` paths in the manifest.
    #[arg(long)]
    pub source_root: Option<PathBuf>,
}

/// Reproducibility timestamp options.
#[derive(ClapArgs, Clone, Debug)]
pub struct TimestampArgs {
    /// Modification time stamped on every entry, in seconds since the Unix epoch.
    #[arg(long, conflicts_with = "portable_mtime")]
    pub mtime: Option<u64>,

    /// Use the portable timestamp (2000-01-01) and ignore SOURCE_DATE_EPOCH.
    #[arg(long)]
    pub portable_mtime: bool,

    /// Read the timestamp from a stamp file (a bare integer or BUILD_TIMESTAMP/SOURCE_DATE_EPOCH lines).
    #[arg(long, conflicts_with = "portable_mtime")]
    pub stamp_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Build a tar, zip or cpio archive from a manifest.
    #[command(alias = "b")]
    Build {
        #[command(flatten)]
        input: ManifestArgs,

        /// The path for the output archive. Format and compression are detected from its extension.
        #[arg(short, long)]
        output: PathBuf,

        /// Container format, overriding detection: tar, zip or cpio.
        #[arg(long)]
        format: Option<ArchiveFormat>,

        /// Compression filter for tar and cpio: none, gzip, bzip2, xz or zstd.
        #[arg(short, long)]
        compression: Option<Compression>,

        /// Compression level (deflate level for zip members).
        #[arg(long)]
        level: Option<u32>,

        /// Detect format and compression as if the output carried this extension (e.g. tar.gz).
        #[arg(long)]
        extension: Option<String>,

        #[command(flatten)]
        timestamp: TimestampArgs,

        /// Store zip members without deflate.
        #[arg(long)]
        zip_store: bool,
    },

    /// Build a Debian binary package.
    Deb {
        #[command(flatten)]
        input: ManifestArgs,

        /// Control member as NAME=PATH (e.g. control=debian/control). Repeat for each member.
        #[arg(long = "control", value_parser = parse_control_member, required = true)]
        control: Vec<(String, PathBuf)>,

        /// The path for the output .deb file.
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long, default_value = "gzip")]
        data_compression: Compression,

        #[arg(long, default_value = "gzip")]
        control_compression: Compression,

        #[arg(long)]
        level: Option<u32>,

        /// Do not generate an md5sums control member.
        #[arg(long)]
        no_md5sums: bool,

        #[command(flatten)]
        timestamp: TimestampArgs,
    },

    /// Build a binary RPM natively, without rpmbuild.
    Rpm {
        #[command(flatten)]
        input: ManifestArgs,

        /// JSON package metadata (name, version, release, arch, summary, ...).
        #[arg(long)]
        metadata: PathBuf,

        /// The path for the output .rpm file.
        #[arg(short, long)]
        output: PathBuf,

        /// Payload compression: gzip, bzip2, xz or zstd.
        #[arg(short, long, default_value = "gzip")]
        compression: Compression,

        #[arg(long)]
        level: Option<u32>,

        #[command(flatten)]
        timestamp: TimestampArgs,
    },

    /// Merge the manifest's %files list into a spec file for rpmbuild, optionally staging a buildroot.
    RpmSpec {
        #[command(flatten)]
        input: ManifestArgs,

        /// Pre-rendered spec file.
        #[arg(long)]
        spec: PathBuf,

        /// The path for the completed spec file.
        #[arg(short, long)]
        output: PathBuf,

        /// Materialize the manifest under this directory.
        #[arg(long)]
        buildroot: Option<PathBuf>,
    },

    /// List the contents of an archive or package.
    #[command(alias = "l")]
    List {
        /// The archive file to list contents of.
        #[arg(required = true)]
        archive: PathBuf,
    },
}

/// Parses a `NAME=PATH` control member argument.
pub fn parse_control_member(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok((name.to_string(), PathBuf::from(path))),
        _ => Err(format!("expected NAME=PATH, got '{}'", s)),
    }
}

/// Gets the timestamp policy from the command-line options.
///
/// Priority:
/// 1. `--portable-mtime` forces the portable timestamp.
/// 2. `--mtime`.
/// 3. `--stamp-file`.
/// 4. The `SOURCE_DATE_EPOCH` environment variable, read when the archive is built.
/// 5. The portable timestamp.
pub fn timestamp_policy_from_opts(opts: &TimestampArgs) -> TimestampPolicy {
    if opts.portable_mtime {
        return TimestampPolicy::Portable;
    }
    TimestampPolicy::SourceProvided { epoch: opts.mtime, stamp_file: opts.stamp_file.clone() }
}

/// Parses command-line arguments using `clap`. Exits with usage on invalid input.
pub fn run() -> Result<Args, Box<dyn std::error::Error>> {
    Ok(Args::parse())
}
