use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use hsgrid::datatype::{Entity, Ref, Scalar};
use hsgrid::grid_filter::{compile_filter, FilterCache};
use hsgrid::metadata::Metadata;
use hsgrid::version::Version;
use hsgrid::{json, zinc, Grid};

const FILTER: &str = "point and siteRef->geoCity == \"Paris\" and curVal > 20kW";

/// Ten sites, each with a hundred points.
fn building() -> Grid {
    let mut grid = Grid::with_version(Version::v3());
    for name in ["id", "dis", "site", "point", "siteRef", "geoCity", "curVal"] {
        grid.add_column(name, Metadata::new()).unwrap();
    }
    for s in 0..10 {
        let mut site = Entity::new();
        site.insert("id".to_string(), Scalar::Ref(Ref::new(&format!("s{s}"))));
        site.insert("dis".to_string(), Scalar::str(&format!("Site {s}")));
        site.insert("site".to_string(), Scalar::Marker);
        site.insert("geoCity".to_string(), Scalar::str(if s % 2 == 0 { "Paris" } else { "Lyon" }));
        grid.append(site).unwrap();
        for p in 0..100 {
            let mut point = Entity::new();
            point.insert("id".to_string(), Scalar::Ref(Ref::new(&format!("s{s}-p{p}"))));
            point.insert("point".to_string(), Scalar::Marker);
            point.insert("siteRef".to_string(), Scalar::Ref(Ref::new(&format!("s{s}"))));
            point.insert("curVal".to_string(), Scalar::quantity(p as f64 * 0.5, "kW"));
            grid.append(point).unwrap();
        }
    }
    grid
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let grid = building();
    let cache = FilterCache::default();

    c.bench_function("compile filter", |b| b.iter(|| compile_filter(black_box(FILTER)).unwrap()));
    c.bench_function("cached filter", |b| b.iter(|| cache.get_or_compile(black_box(FILTER)).unwrap()));
    c.bench_function("filter 1k rows", |b| {
        b.iter(|| grid.filter_cached(&cache, black_box(FILTER), None).unwrap())
    });

    let zinc_text = zinc::dump_grid(&grid).unwrap();
    let json_text = json::dump_grid(&grid).unwrap();
    c.bench_function("parse zinc 1k rows", |b| b.iter(|| zinc::parse_grid(black_box(&zinc_text)).unwrap()));
    c.bench_function("parse json 1k rows", |b| b.iter(|| json::parse_grid(black_box(&json_text)).unwrap()));
    c.bench_function("dump zinc 1k rows", |b| b.iter(|| zinc::dump_grid(black_box(&grid)).unwrap()));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
