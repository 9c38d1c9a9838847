use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::Value;
use tagrelay::dispatch::EventRouter;
use tagrelay::message::Message;

const BATCH_SIZES: &[usize] = &[64, 256, 1024];
const TAGS: [&str; 4] = ["profile", "rank", "bonus", "notice"];

fn dispatch_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("router_dispatch");

    for &size in BATCH_SIZES {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let router = EventRouter::new();
            for tag in TAGS {
                router.subscribe_fn(tag, |_| Ok(()));
            }
            let batch: Vec<Message> = (0..size)
                .map(|i| Message::ok(TAGS[i % TAGS.len()], Value::Null))
                .collect();

            b.iter(|| router.dispatch(&batch));
        });
    }

    group.finish();
}

criterion_group!(benches, dispatch_throughput);
criterion_main!(benches);
