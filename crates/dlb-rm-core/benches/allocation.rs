//! Allocation benchmarks using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dlb_rm_core::args::CreateSchedDomainArgs;
use dlb_rm_core::bitmap::RangeBitmap;
use dlb_rm_core::{Device, DeviceConfig, Func, MAX_NUM_LDB_CREDITS};

/// Credit bitmap with every other 64-entry block taken.
fn fragmented_credits() -> RangeBitmap {
    let mut bm = RangeBitmap::new(MAX_NUM_LDB_CREDITS).unwrap();
    bm.fill().unwrap();
    for block in (0..MAX_NUM_LDB_CREDITS).step_by(128) {
        bm.clear_range(block, 64).unwrap();
    }
    // One run large enough for every request below, at the far end.
    bm.set_range(MAX_NUM_LDB_CREDITS - 4096, 4096).unwrap();
    bm
}

fn benchmark_bitmap_search(c: &mut Criterion) {
    let bm = fragmented_credits();
    let mut group = c.benchmark_group("RangeBitmap");

    for len in [16usize, 64, 1024, 4096] {
        group.bench_with_input(BenchmarkId::new("find_set_bit_range", len), &len, |b, &len| {
            b.iter(|| black_box(bm.find_set_bit_range(black_box(len)).unwrap()));
        });
    }
    group.bench_function("longest_set_range", |b| {
        b.iter(|| black_box(bm.longest_set_range().unwrap()));
    });

    group.finish();
}

fn benchmark_domain_cycle(c: &mut Criterion) {
    let (dev, _) = Device::simulated(DeviceConfig::default()).unwrap();
    let args = CreateSchedDomainArgs {
        num_ldb_queues: 8,
        num_ldb_ports: 4,
        num_dir_ports: 4,
        num_atomic_inflights: 128,
        num_hist_list_entries: 256,
        num_ldb_credits: 2048,
        num_dir_credits: 512,
        num_ldb_credit_pools: 2,
        num_dir_credit_pools: 2,
    };

    let mut group = c.benchmark_group("Domain");
    group.bench_function("create_reset", |b| {
        b.iter(|| {
            let id = dev.create_sched_domain(Func::Pf, black_box(&args)).unwrap();
            dev.reset_domain(Func::Pf, id).unwrap();
        });
    });
    group.bench_function("snapshot", |b| {
        b.iter(|| black_box(dev.snapshot()));
    });
    group.finish();
}

criterion_group!(benches, benchmark_bitmap_search, benchmark_domain_cycle);
criterion_main!(benches);
