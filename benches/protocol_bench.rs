use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tagtrail::{Baseline, RfChain, TagDb, Tracker};

fn baseline_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Baseline::new(Baseline::generate_reader_configs(4, &[], dir.path()).unwrap());
    let mut tag = engine.generate_tag_secret(1).unwrap();
    for reader in 0..4 {
        engine.update_tag(reader, &mut tag).unwrap();
    }

    c.bench_function("baseline_verify_4_hops", |b| {
        b.iter(|| engine.verify_tag(black_box(&tag)).unwrap())
    });
}

fn tracker_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Tracker::new(
        Tracker::generate_reader_configs(2, &[vec![0, 1]], dir.path()).unwrap(),
    );
    let mut tag = engine.generate_tag_secret(1).unwrap();
    engine.update_tag(0, &mut tag).unwrap();
    engine.update_tag(1, &mut tag).unwrap();

    c.bench_function("tracker_verify_2_hops", |b| {
        b.iter(|| engine.verify_tag(black_box(&tag)).unwrap())
    });
}

fn rfchain_benchmark(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let db = TagDb::in_memory().unwrap();
    let engine =
        RfChain::new(RfChain::generate_reader_configs(4, &[], dir.path(), &db).unwrap());
    let mut tag = engine.generate_tag_secret(&db, 0, 1).unwrap();
    for reader in [1, 2, 3] {
        engine.update_tag(&db, reader, &mut tag).unwrap();
    }

    c.bench_function("rfchain_verify_full_chain", |b| {
        b.iter(|| engine.verify_tag(&db, black_box(&tag), 0).unwrap())
    });

    c.bench_function("rfchain_verify_depth_1", |b| {
        b.iter(|| engine.verify_tag(&db, black_box(&tag), 1).unwrap())
    });
}

criterion_group!(benches, baseline_benchmark, tracker_benchmark, rfchain_benchmark);
criterion_main!(benches);
