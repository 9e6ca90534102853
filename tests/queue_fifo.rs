use std::thread;
use std::time::Duration;

use tempfile::tempdir;
use tuner_conformance::core::{MessageQueue, QueueNotifyBits};

#[test]
fn write_then_read_round_trips_through_peer() {
    let dir = tempdir().expect("tempdir");
    let owner = MessageQueue::create(dir.path().join("q.fmq"), 1024).expect("create");
    let peer = MessageQueue::attach(owner.desc(), true).expect("attach");

    let payload: Vec<u8> = (0..=255u8).collect();
    assert!(owner.write(&payload));
    assert_eq!(peer.available_to_read(), payload.len());

    let mut out = vec![0u8; payload.len()];
    assert!(peer.read(&mut out));
    assert_eq!(out, payload);
    assert_eq!(owner.available_to_write(), 1024);
}

#[test]
fn oversized_write_fails_without_side_effects() {
    let dir = tempdir().expect("tempdir");
    let queue = MessageQueue::create(dir.path().join("q.fmq"), 64).expect("create");
    assert!(queue.write(&[1u8; 40]));

    assert!(!queue.write(&[2u8; 25]));
    assert_eq!(queue.available_to_read(), 40);
    assert_eq!(queue.available_to_write(), 24);

    let mut out = [0u8; 40];
    assert!(queue.read(&mut out));
    assert!(out.iter().all(|&b| b == 1));
}

#[test]
fn writes_are_read_back_in_order_across_wraparound() {
    let dir = tempdir().expect("tempdir");
    let writer = MessageQueue::create(dir.path().join("q.fmq"), 100).expect("create");
    let reader = MessageQueue::attach(writer.desc(), true).expect("attach");

    let mut expected = Vec::new();
    let mut seen = Vec::new();
    for round in 0..20u8 {
        let chunk = vec![round; 37];
        assert!(writer.write(&chunk));
        expected.extend_from_slice(&chunk);
        let mut out = vec![0u8; 37];
        assert!(reader.read(&mut out));
        seen.extend_from_slice(&out);
    }
    assert_eq!(seen, expected);
}

#[test]
fn producer_and_consumer_threads_exchange_a_stream() {
    const TOTAL: usize = 64 * 1024;
    let dir = tempdir().expect("tempdir");
    let owner = MessageQueue::create(dir.path().join("q.fmq"), 4096).expect("create");
    let desc = owner.desc().clone();

    let consumer = thread::spawn(move || {
        let queue = MessageQueue::attach(&desc, false).expect("attach");
        let flag = queue.event_flag();
        let mut received = Vec::with_capacity(TOTAL);
        while received.len() < TOTAL {
            let available = queue.available_to_read();
            if available == 0 {
                flag.wait(QueueNotifyBits::DATA_READY, Some(Duration::from_millis(100)))
                    .expect("wait");
                continue;
            }
            let mut buf = vec![0u8; available];
            assert!(queue.read(&mut buf));
            flag.wake(QueueNotifyBits::DATA_CONSUMED).expect("wake");
            received.extend_from_slice(&buf);
        }
        received
    });

    let stream: Vec<u8> = (0..TOTAL).map(|i| (i % 251) as u8).collect();
    let flag = owner.event_flag();
    for chunk in stream.chunks(1000) {
        while owner.available_to_write() < chunk.len() {
            flag.wait(QueueNotifyBits::DATA_CONSUMED, Some(Duration::from_millis(100)))
                .expect("wait");
        }
        assert!(owner.write(chunk));
        flag.wake(QueueNotifyBits::DATA_READY).expect("wake");
    }

    assert_eq!(consumer.join().unwrap(), stream);
}
