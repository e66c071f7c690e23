//! Command dispatch for the `pkgasm` binary: turns parsed arguments into library calls.

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::archive::{self, BuildOptions};
use crate::cli::{self, Commands, ManifestArgs};
use crate::common::ContentSource;
use crate::logging;
use crate::manifest::{FormatDefaults, Manifest, ManifestDocument, ManifestGroup, ResolveOptions};
use crate::package::deb::{self, ControlFiles, DebOptions};
use crate::package::rpm::{self, RpmMetadata, RpmOptions};
use crate::{inspect, PackageError};

fn read_input(path: &Path) -> Result<Vec<u8>, PackageError> {
    fs::read(path).map_err(|e| PackageError::io(e, path))
}

/// Reads every manifest document in order, then the optional tree group.
fn load_groups(input: &ManifestArgs) -> Result<Vec<ManifestGroup>, PackageError> {
    let mut groups = Vec::new();
    for path in &input.manifests {
        let doc = ManifestDocument::from_json(&read_input(path)?)?;
        debug!(path = %path.display(), groups = doc.groups.len(), "manifest loaded");
        groups.extend(doc.groups);
    }
    if let Some(tree) = &input.tree {
        groups.push(ManifestGroup::from_tree("tree", tree)?);
    }
    Ok(groups)
}

fn resolve_options(input: &ManifestArgs, format_defaults: FormatDefaults) -> ResolveOptions {
    ResolveOptions {
        strip_prefix: input.strip_prefix.clone(),
        package_dir: input.package_dir.clone(),
        source_root: input.source_root.clone(),
        format_defaults,
    }
}

fn load_manifest(input: &ManifestArgs) -> Result<Manifest, PackageError> {
    Manifest::from_groups(&load_groups(input)?, &resolve_options(input, FormatDefaults::default()))
}

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<(), Box<dyn std::error::Error>> {
    let args = cli::run()?;
    logging::init(args.verbose, args.log_json);

    match &args.command {
        Commands::Build { input, output, format, compression, level, extension, timestamp, zip_store } => {
            let options = BuildOptions {
                format: *format,
                compression: *compression,
                level: *level,
                extension: extension.clone(),
                timestamp: cli::timestamp_policy_from_opts(timestamp),
                strip_prefix: input.strip_prefix.clone(),
                package_dir: input.package_dir.clone(),
                source_root: input.source_root.clone(),
                zip_store: *zip_store,
            };
            let groups = load_groups(input)?;
            let written = archive::build_groups_to_path(&groups, &options, output)?;
            println!("Created {} archive {}", written, output.display());
        }
        Commands::Deb {
            input,
            control,
            output,
            data_compression,
            control_compression,
            level,
            no_md5sums,
            timestamp,
        } => {
            let manifest = load_manifest(input)?;
            let mut files = ControlFiles::new();
            for (name, path) in control {
                files.insert(name, ContentSource::Path(path.clone()))?;
            }
            let options = DebOptions {
                data_compression: *data_compression,
                control_compression: *control_compression,
                level: *level,
                md5sums: !*no_md5sums,
                timestamp: cli::timestamp_policy_from_opts(timestamp),
            };
            deb::build_deb_to_path(&manifest, &files, &options, output)?;
            println!("Created {} ({} entries)", output.display(), manifest.len());
        }
        Commands::Rpm { input, metadata, output, compression, level, timestamp } => {
            let manifest = load_manifest(input)?;
            let meta = RpmMetadata::from_json(&read_input(metadata)?)?;
            let options = RpmOptions {
                compression: *compression,
                level: *level,
                timestamp: cli::timestamp_policy_from_opts(timestamp),
            };
            rpm::build_rpm_to_path(&manifest, &meta, &options, output)?;
            println!("Created {} ({})", output.display(), meta.nevr());
        }
        Commands::RpmSpec { input, spec, output, buildroot } => {
            let manifest = load_manifest(input)?;
            let text = String::from_utf8_lossy(&read_input(spec)?).into_owned();
            let rendered = rpm::prepare_spec(&text, &manifest)?;
            archive::write_atomically(output, |w| {
                use std::io::Write;
                w.write_all(rendered.as_bytes()).map_err(|e| PackageError::io(e, output))
            })?;
            if let Some(root) = buildroot {
                rpm::stage_buildroot(&manifest, root)?;
            }
            info!(spec = %output.display(), "spec written");
        }
        Commands::List { archive } => {
            let listing = inspect::list(archive)?;
            print!("{}", listing);
        }
    }

    Ok(())
}
