use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tempfile::tempdir;
use tuner_conformance::core::{MessageQueue, QueueNotifyBits};

const PACKET: usize = 188;
const CHUNK: usize = PACKET * 6;
const QUEUE_SIZE: usize = 1024 * 1024;
const CHUNKS_PER_ITER: usize = 10_000;

fn bench_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_copy");
    group.throughput(Throughput::Bytes(CHUNK as u64));

    group.bench_function("write_read_chunk", |b| {
        let dir = tempdir().expect("tempdir");
        let queue = MessageQueue::create(dir.path().join("copy.fmq"), QUEUE_SIZE).expect("create");
        let payload = vec![0x47u8; CHUNK];
        let mut out = vec![0u8; CHUNK];
        b.iter(|| {
            assert!(queue.write(black_box(&payload)));
            assert!(queue.read(black_box(&mut out)));
        })
    });
    group.finish();
}

fn bench_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_streaming");
    group.measurement_time(Duration::from_secs(20));
    group.throughput(Throughput::Bytes((CHUNK * CHUNKS_PER_ITER) as u64));

    group.bench_function("producer_consumer_event_flag", |b| {
        b.iter_custom(|iters| {
            let dir = tempdir().expect("tempdir");
            let owner =
                MessageQueue::create(dir.path().join("stream.fmq"), QUEUE_SIZE).expect("create");
            let peer = MessageQueue::attach(owner.desc(), false).expect("attach");
            let total = CHUNKS_PER_ITER as u64 * iters;
            let barrier = Arc::new(Barrier::new(2));
            let consumer_barrier = Arc::clone(&barrier);

            let consumer = thread::spawn(move || {
                let mut out = vec![0u8; CHUNK];
                consumer_barrier.wait();
                let mut received = 0u64;
                while received < total {
                    if peer.read(&mut out) {
                        received += 1;
                        peer.event_flag()
                            .wake(QueueNotifyBits::DATA_CONSUMED)
                            .expect("wake");
                    } else {
                        let _ = peer
                            .event_flag()
                            .wait(QueueNotifyBits::DATA_READY, Some(Duration::from_millis(10)));
                    }
                }
            });

            let payload = vec![0x47u8; CHUNK];
            barrier.wait();
            let start = Instant::now();
            for _ in 0..total {
                while !owner.write(black_box(&payload)) {
                    let _ = owner
                        .event_flag()
                        .wait(QueueNotifyBits::DATA_CONSUMED, Some(Duration::from_millis(10)));
                }
                owner
                    .event_flag()
                    .wake(QueueNotifyBits::DATA_READY)
                    .expect("wake");
            }
            consumer.join().expect("consumer join");
            start.elapsed()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_copy, bench_streaming);
criterion_main!(benches);
