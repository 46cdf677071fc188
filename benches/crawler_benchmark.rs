//! Id derivation and queue dispatch benchmarks

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Runtime;

use energy_price_crawler::crawling::{PostalTask, TaskQueue};
use energy_price_crawler::domain::TracingSink;
use energy_price_crawler::domain::ids;

fn bench_ids(c: &mut Criterion) {
    c.bench_function("postal_area_id", |b| {
        b.iter(|| ids::postal_area_id(black_box(" Testland "), black_box("10 115")));
    });
    c.bench_function("city_id", |b| {
        b.iter(|| ids::city_id(black_box("Testland"), black_box("North Province"), black_box("Capital")));
    });
}

fn bench_queue_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("task_queue_drain");

    for size in [100usize, 1_000, 10_000] {
        let tasks: Vec<PostalTask> = (0..size)
            .map(|i| PostalTask { area_id: format!("area-{i}"), code: format!("{i:05}") })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &tasks, |b, tasks| {
            b.iter(|| rt.block_on(async {
                let queue = Arc::new(TaskQueue::with_tasks("Testland", "http://x/", tasks.clone(), Arc::new(TracingSink)));
                let mut workers = Vec::new();
                for _ in 0..4 {
                    let queue = Arc::clone(&queue);
                    workers.push(tokio::spawn(async move {
                        let mut n = 0usize;
                        while queue.next().await.is_some() {
                            n += 1;
                        }
                        n
                    }));
                }
                let mut total = 0;
                for worker in workers {
                    total += worker.await.unwrap_or_default();
                }
                black_box(total)
            }));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ids, bench_queue_dispatch);
criterion_main!(benches);
