use pkgasm::archive::{self, ArchiveFormat, BuildOptions};
use pkgasm::compress::Compression;
use pkgasm::manifest::{EntrySpec, Manifest, ManifestGroup, ResolveOptions};
use pkgasm::package::deb::{self, ControlFiles, DebOptions};
use pkgasm::package::rpm::{self, RpmMetadata, RpmOptions};
use pkgasm::timestamp::{TimestampPolicy, PORTABLE_MTIME, ZIP_EPOCH_FLOOR};
use pkgasm::common::ContentSource;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

// ---------- helpers ----------
fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn tree_manifest(root: &Path) -> Result<Manifest, Box<dyn std::error::Error>> {
    let group = ManifestGroup::from_tree("tree", root)?.prefix("opt/app");
    Ok(Manifest::from_groups(&[group], &ResolveOptions::default())?)
}

fn populate(root: &Path) -> std::io::Result<()> {
    fs::create_dir_all(root.join("lib/nested"))?;
    fs::write(root.join("lib/nested/data.bin"), (0..=255u8).collect::<Vec<_>>())?;
    fs::write(root.join("lib/a.txt"), b"alpha\n")?;
    fs::write(root.join("b.txt"), b"beta\n".repeat(100))?;
    Ok(())
}

fn touch(path: &Path, secs: u64) -> std::io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
}

#[test]
fn identical_inputs_give_identical_bytes_for_every_format() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    populate(dir.path())?;
    let manifest = tree_manifest(dir.path())?;

    let cases = [
        (ArchiveFormat::Tar, Compression::None),
        (ArchiveFormat::Tar, Compression::Gzip),
        (ArchiveFormat::Tar, Compression::Bzip2),
        (ArchiveFormat::Tar, Compression::Xz),
        (ArchiveFormat::Tar, Compression::Zstd),
        (ArchiveFormat::Cpio, Compression::Gzip),
        (ArchiveFormat::Zip, Compression::None),
    ];
    for (format, compression) in cases {
        let options = BuildOptions {
            compression: Some(compression),
            timestamp: TimestampPolicy::Fixed(1_650_000_000),
            ..Default::default()
        };
        let first = archive::build(&manifest, format, &options)?;
        let second = archive::build(&manifest, format, &options)?;
        assert_eq!(digest(&first), digest(&second), "{} {} is not reproducible", format, compression);
    }
    Ok(())
}

#[test]
fn disk_mtimes_do_not_leak() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    populate(dir.path())?;
    let options = BuildOptions { timestamp: TimestampPolicy::Portable, ..Default::default() };

    let before = archive::build(&tree_manifest(dir.path())?, ArchiveFormat::Tar, &options)?;
    touch(&dir.path().join("b.txt"), 1_234_567_890)?;
    touch(&dir.path().join("lib/a.txt"), 42)?;
    let after = archive::build(&tree_manifest(dir.path())?, ArchiveFormat::Tar, &options)?;
    assert_eq!(before, after);

    let mut reader = tar::Archive::new(&after[..]);
    for entry in reader.entries()? {
        assert_eq!(entry?.header().mtime()?, PORTABLE_MTIME);
    }
    Ok(())
}

#[test]
fn declaration_order_does_not_change_output() -> Result<(), Box<dyn std::error::Error>> {
    let forward = ManifestGroup::new("g")
        .entry(EntrySpec::inline("z", "last"))
        .entry(EntrySpec::directory("a"))
        .entry(EntrySpec::inline("a/m", "middle"));
    let reversed = ManifestGroup::new("g")
        .entry(EntrySpec::inline("a/m", "middle"))
        .entry(EntrySpec::directory("a"))
        .entry(EntrySpec::inline("z", "last"));

    let options = BuildOptions::default();
    let a = archive::build(&Manifest::from_groups(&[forward], &ResolveOptions::default())?, ArchiveFormat::Zip, &options)?;
    let b = archive::build(&Manifest::from_groups(&[reversed], &ResolveOptions::default())?, ArchiveFormat::Zip, &options)?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn source_date_epoch_is_honored_and_floored_for_zip() -> Result<(), Box<dyn std::error::Error>> {
    let policy = TimestampPolicy::SourceProvided { epoch: None, stamp_file: None };
    assert_eq!(policy.resolve_with_env(None, Some("1700000000".into()))?, 1_700_000_000);
    assert_eq!(policy.resolve_with_env(None, None)?, PORTABLE_MTIME);
    assert_eq!(policy.resolve_with_env(ArchiveFormat::Zip.timestamp_floor(), Some("0".into()))?, ZIP_EPOCH_FLOOR);
    assert!(policy.resolve_with_env(None, Some("yesterday".into())).is_err());

    let explicit = TimestampPolicy::SourceProvided { epoch: Some(5), stamp_file: None };
    assert_eq!(explicit.resolve_with_env(None, Some("1700000000".into()))?, 5);
    Ok(())
}

#[test]
fn sub_floor_timestamps_clamp_for_zip_only() -> Result<(), Box<dyn std::error::Error>> {
    let group = ManifestGroup::new("g").entry(EntrySpec::inline("f", "x"));
    let manifest = Manifest::from_groups(&[group], &ResolveOptions::default())?;
    let at = |ts: u64| BuildOptions { timestamp: TimestampPolicy::Fixed(ts), ..Default::default() };

    let early = archive::build(&manifest, ArchiveFormat::Zip, &at(1000))?;
    let floor = archive::build(&manifest, ArchiveFormat::Zip, &at(ZIP_EPOCH_FLOOR))?;
    assert_eq!(early, floor);

    let early = archive::build(&manifest, ArchiveFormat::Tar, &at(1000))?;
    let floor = archive::build(&manifest, ArchiveFormat::Tar, &at(ZIP_EPOCH_FLOOR))?;
    assert_ne!(early, floor);
    Ok(())
}

#[test]
fn packages_are_reproducible() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    populate(dir.path())?;
    let manifest = tree_manifest(dir.path())?;

    let control = ControlFiles::new()
        .with("control", ContentSource::Bytes(b"Package: app\nVersion: 1\n".to_vec()))?
        .with("postinst", ContentSource::Bytes(b"#!/bin/sh\nexit 0\n".to_vec()))?;
    let deb_options = DebOptions { data_compression: Compression::Zstd, ..DebOptions::default() };
    let a = deb::build_deb(&manifest, &control, &deb_options, Vec::new())?;
    let b = deb::build_deb(&manifest, &control, &deb_options, Vec::new())?;
    assert_eq!(digest(&a), digest(&b));

    let meta = RpmMetadata::from_json(br#"{"name": "app", "version": "1"}"#)?;
    let rpm_options = RpmOptions { compression: Compression::Xz, ..RpmOptions::default() };
    let a = rpm::build_rpm(&manifest, &meta, &rpm_options, Vec::new())?;
    let b = rpm::build_rpm(&manifest, &meta, &rpm_options, Vec::new())?;
    assert_eq!(digest(&a), digest(&b));
    Ok(())
}
