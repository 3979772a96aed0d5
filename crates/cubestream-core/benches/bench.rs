use bytes::Bytes;
use core::{hint::black_box, num::NonZeroUsize};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use cubestream_core::{ChunkPolicy, types::MAX_CHUNK_SIZE};

const PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

fn split_bench(c: &mut Criterion) {
    let payload = Bytes::from(vec![0xA5_u8; PAYLOAD_SIZE]);
    let mut group = c.benchmark_group("chunk_split");
    group.throughput(Throughput::Bytes(PAYLOAD_SIZE as u64));

    for size in [16 * 1024, 64 * 1024, 1024 * 1024, MAX_CHUNK_SIZE] {
        let policy = ChunkPolicy::new(NonZeroUsize::new(size).unwrap());
        group.bench_with_input(BenchmarkId::from_parameter(size), &policy, |b, policy| {
            b.iter(|| {
                let mut total = 0;
                for chunk in policy.split(black_box(payload.clone())) {
                    total += black_box(chunk).len();
                }
                total
            });
        });
    }

    group.finish();
}

criterion_group!(benches, split_bench);
criterion_main!(benches);
