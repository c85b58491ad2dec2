use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use legacy_proxy::{candidate::CandidateSet, config::Config, content_type::negotiate};

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn candidate_build_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("candidate_build");
    let index_exts = strings(&["htm", "html", "php"]);

    for layers in [0usize, 1, 4].iter() {
        let overrides: Vec<String> = (0..*layers).map(|i| format!("override{}", i)).collect();
        group.bench_with_input(BenchmarkId::new("no_query", layers), &overrides, |b, overrides| {
            b.iter(|| {
                CandidateSet::build(
                    black_box(Path::new("/srv/htdocs")),
                    overrides,
                    &index_exts,
                    "www.example.com",
                    "/games/arcade/game.swf",
                    "",
                )
            });
        });
        group.bench_with_input(BenchmarkId::new("with_query", layers), &overrides, |b, overrides| {
            b.iter(|| {
                CandidateSet::build(
                    black_box(Path::new("/srv/htdocs")),
                    overrides,
                    &index_exts,
                    "www.example.com",
                    "/games/arcade/loader.php",
                    "id=42&lang=en&mode=full",
                )
            });
        });
    }

    group.finish();
}

fn negotiate_benchmark(c: &mut Criterion) {
    let config = Config::new();
    let mut group = c.benchmark_group("content_type_negotiate");

    let cases = [
        ("request_ext", "/games/a.swf", None),
        ("served_ext", "/games/", Some("/srv/htdocs/example.com/games/index.htm")),
        ("unknown", "/data.xyz", Some("/srv/htdocs/example.com/data.qqq")),
    ];
    for (name, path, served) in cases.iter() {
        group.bench_function(*name, |b| {
            b.iter(|| negotiate(&config, black_box(path), *served));
        });
    }

    group.finish();
}

criterion_group!(benches, candidate_build_benchmark, negotiate_benchmark);
criterion_main!(benches);
