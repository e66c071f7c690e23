//! Criterion benchmark: merge a synthetic manifest and serialize it in every format.
//! Run with: cargo bench --bench build_benchmark

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pkgasm::archive::{self, ArchiveFormat, BuildOptions};
use pkgasm::compress::Compression;
use pkgasm::manifest::{EntrySpec, Manifest, ManifestGroup, ResolveOptions};
use std::hint::black_box;

/// 32 directories with 32 small text files each.
fn synthetic_groups() -> Vec<ManifestGroup> {
    (0..32)
        .map(|d| {
            let mut group = ManifestGroup::new(format!("dir{d}")).prefix(format!("usr/share/pkg/dir{d:02}"));
            for f in 0..32 {
                group = group.entry(EntrySpec::inline(format!("file{f:02}.txt"), format!("payload {d} {f}\n").repeat(64)));
            }
            group
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let groups = synthetic_groups();
    c.bench_function("merge_1024_entries", |b| {
        b.iter(|| Manifest::from_groups(black_box(&groups), &ResolveOptions::default()).unwrap())
    });
}

fn bench_formats(c: &mut Criterion) {
    let manifest = Manifest::from_groups(&synthetic_groups(), &ResolveOptions::default()).unwrap();
    let cases = [
        ("tar", ArchiveFormat::Tar, Compression::None),
        ("tar.gz", ArchiveFormat::Tar, Compression::Gzip),
        ("tar.zst", ArchiveFormat::Tar, Compression::Zstd),
        ("zip", ArchiveFormat::Zip, Compression::None),
        ("cpio", ArchiveFormat::Cpio, Compression::None),
    ];

    let mut group = c.benchmark_group("build");
    group.sample_size(20);
    for (name, format, compression) in cases {
        let options = BuildOptions { compression: Some(compression), ..Default::default() };
        group.bench_with_input(BenchmarkId::from_parameter(name), &options, |b, options| {
            b.iter(|| archive::build(black_box(&manifest), format, options).unwrap())
        });
    }
    group.finish();
}

criterion_group!(build_benchmark, bench_merge, bench_formats);
criterion_main!(build_benchmark);
