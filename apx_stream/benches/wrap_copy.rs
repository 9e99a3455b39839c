//! Benchmarks for the ring-to-ring copy hot path.

use apx_stream::{AudioBuffer, BufferId, copy_with_wrap, fill_silence, read_into};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_wrap_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("wrap_copy");

    for &bytes in &[384usize, 1536, 8192] {
        group.bench_function(format!("aligned_{bytes}"), |b| {
            let mut src = AudioBuffer::alloc_coherent(BufferId(1), bytes * 4);
            let mut dst = AudioBuffer::alloc_coherent(BufferId(2), bytes * 4);

            b.iter(|| {
                fill_silence(&mut src, bytes);
                let n = copy_with_wrap(black_box(&mut src), black_box(&mut dst), bytes);
                let mut sink = vec![0u8; n];
                read_into(&mut dst, &mut sink);
                black_box(n)
            });
        });

        group.bench_function(format!("wrapped_{bytes}"), |b| {
            let mut src = AudioBuffer::alloc_coherent(BufferId(1), bytes * 4);
            let mut dst = AudioBuffer::alloc_coherent(BufferId(2), bytes * 4);

            // Force both rings to straddle the wrap point every iteration.
            let skew = bytes / 3;
            fill_silence(&mut src, src.capacity() - skew);
            let mut drain = vec![0u8; src.capacity() - skew];
            read_into(&mut src, &mut drain);
            fill_silence(&mut dst, dst.capacity() - skew / 2);
            let mut drain = vec![0u8; dst.capacity() - skew / 2];
            read_into(&mut dst, &mut drain);

            b.iter(|| {
                fill_silence(&mut src, bytes);
                let n = copy_with_wrap(black_box(&mut src), black_box(&mut dst), bytes);
                let mut sink = vec![0u8; n];
                read_into(&mut dst, &mut sink);
                black_box(n)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_wrap_copy);
criterion_main!(benches);
