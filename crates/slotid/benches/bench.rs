use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use slotid::{Allocator, IdStore, LocalStore};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};

// Size of the ID space, and number of IDs generated per iteration.
const SPACE: u64 = 4096;

fn allocator() -> Allocator<LocalStore> {
    Allocator::with_store(LocalStore::new(SPACE).unwrap()).unwrap()
}

/// Fills an empty space from the bottom: every probe hits a free slot.
fn bench_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate/fill");
    group.throughput(Throughput::Elements(SPACE));

    group.bench_function(format!("elems/{SPACE}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let allocator = allocator();
                for _ in 0..SPACE {
                    black_box(allocator.generate().unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Generate/free churn on a half-full space, where the cursor has to skip
/// over taken slots.
fn bench_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("generate/churn");
    group.throughput(Throughput::Elements(SPACE));

    group.bench_function(format!("elems/{SPACE}"), |b| {
        let allocator = allocator();
        for id in (0..SPACE).step_by(2) {
            allocator.allocate(id).unwrap();
        }
        b.iter(|| {
            for _ in 0..SPACE {
                let id = allocator.generate().unwrap();
                allocator.free(black_box(id)).unwrap();
            }
        });
    });

    group.finish();
}

/// Contended generate/free across threads sharing one allocator.
fn bench_contended(c: &mut Criterion) {
    const THREADS: usize = 8;

    let mut group = c.benchmark_group("generate/contended");
    group.throughput(Throughput::Elements(SPACE));

    group.bench_function(format!("threads/{THREADS}"), |b| {
        b.iter_custom(|iters| {
            let allocator = Arc::new(allocator());
            let barrier = Arc::new(Barrier::new(THREADS + 1));
            let per_thread = SPACE / THREADS as u64;

            let start = scope(|s| {
                for _ in 0..THREADS {
                    let allocator = Arc::clone(&allocator);
                    let barrier = Arc::clone(&barrier);
                    s.spawn(move || {
                        barrier.wait();
                        for _ in 0..iters {
                            for _ in 0..per_thread {
                                let id = allocator.generate().unwrap();
                                allocator.free(black_box(id)).unwrap();
                            }
                        }
                    });
                }
                barrier.wait();
                Instant::now()
            });

            start.elapsed()
        });
    });

    group.finish();
}

fn bench_free_all(c: &mut Criterion) {
    c.bench_function("free_all/local", |b| {
        let mut store = LocalStore::new(SPACE).unwrap();
        b.iter(|| {
            for offset in (0..SPACE).step_by(7) {
                store.allocate(offset).unwrap();
            }
            store.free_all().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_fill,
    bench_churn,
    bench_contended,
    bench_free_all
);
criterion_main!(benches);
