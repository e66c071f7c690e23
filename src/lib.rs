//! # pkgasm Core Library
//!
//! Deterministic assembly of tar, zip and cpio archives and of Debian and RPM packages
//! from a declarative manifest. The same manifest, options and source bytes always
//! produce byte-identical output.
//!
//! ## Key Modules
//!
//! - [`paths`]: resolves raw source paths into archive destinations.
//! - [`attrs`]: merges entry, group and format attribute layers.
//! - [`manifest`]: manifest groups and the merged, conflict-checked [`manifest::Manifest`].
//! - [`timestamp`]: the single normalized mtime stamped on every entry.
//! - [`archive`]: tar, zip, cpio and ar writers.
//! - [`package`]: Debian and RPM orchestrators.
//! - [`inspect`]: lists the contents of anything the writers produce.
//!
//! ## Examples
//!
//! ```no_run
//! use pkgasm::archive::{self, ArchiveFormat, BuildOptions};
//! use pkgasm::manifest::{EntrySpec, Manifest, ManifestGroup, ResolveOptions};
//!
//! let group = ManifestGroup::new("app")
//!     .prefix("usr/share/app")
//!     .entry(EntrySpec::inline("README", "hello\n"));
//! let manifest = Manifest::from_groups(&[group], &ResolveOptions::default())?;
//! let bytes = archive::build(&manifest, ArchiveFormat::Tar, &BuildOptions::default())?;
//! # Ok::<(), pkgasm::PackageError>(())
//! ```

pub mod archive;
pub mod attrs;
pub mod cli;
pub mod cli_runner;
pub mod common;
pub mod compress;
pub mod error;
pub use error::PackageError;
pub mod inspect;
pub mod logging;
pub mod manifest;
pub mod package;
pub mod paths;
pub mod timestamp;

// Cross-platform filesystem wrapper
pub mod fsx;
