use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use arbor::schema::{
    CargoSpec, Catalog, CollectionSpec, ConfigClass, ElementKind, ElementSpec, ValueSpec,
    ValueType,
};
use arbor::{CheckPolicy, Instance};
use std::sync::Arc;

const PROGRAM_SIZES: &[usize] = &[10, 100, 500];

fn bench_catalog() -> Arc<Catalog> {
    let leaf = Arc::new(ValueSpec::builder(ValueType::String).build().unwrap());
    let hash = Arc::new(
        CollectionSpec::hash(CargoSpec::Leaf(Arc::clone(&leaf)))
            .build()
            .unwrap(),
    );
    let mut catalog = Catalog::new();
    catalog
        .add_class(
            ConfigClass::new("Master")
                .element(ElementSpec::new("settings", ElementKind::Hash(hash)))
                .element(ElementSpec::new("name", ElementKind::Leaf(leaf)))
                .build()
                .expect("benchmark class"),
        )
        .expect("benchmark catalog");
    Arc::new(catalog)
}

fn hash_program(entries: usize) -> String {
    (0..entries)
        .map(|i| format!("settings:key{i}=value{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn bench_load(c: &mut Criterion) {
    let catalog = bench_catalog();
    let mut group = c.benchmark_group("loader");
    for &size in PROGRAM_SIZES {
        let program = hash_program(size);
        group.bench_with_input(BenchmarkId::new("load", size), &program, |b, program| {
            b.iter(|| {
                let mut instance =
                    Instance::new(Arc::clone(&catalog), "Master").expect("instance");
                instance
                    .load(black_box(program), CheckPolicy::Yes)
                    .expect("load");
                instance.needs_save()
            });
        });
    }
    group.finish();
}

fn bench_dump(c: &mut Criterion) {
    let catalog = bench_catalog();
    let program = hash_program(200);
    let mut group = c.benchmark_group("dump");
    group.bench_function("dump_200_entries", |b| {
        let mut instance = Instance::new(Arc::clone(&catalog), "Master").expect("instance");
        instance.load(&program, CheckPolicy::Yes).expect("load");
        b.iter(|| instance.dump().expect("dump"));
    });
    group.finish();
}

criterion_group!(benches, bench_load, bench_dump);
criterion_main!(benches);
