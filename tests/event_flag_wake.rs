#[cfg(target_os = "linux")]
use std::sync::mpsc;
#[cfg(target_os = "linux")]
use std::time::Duration;
#[cfg(target_os = "linux")]
use tuner_conformance::core::{MessageQueue, QueueNotifyBits};

#[cfg(target_os = "linux")]
#[test]
fn peer_wait_wakes_on_data_ready() -> tuner_conformance::core::Result<()> {
    let dir = tempfile::tempdir()?;
    let owner = MessageQueue::create(dir.path().join("q.fmq"), 256)?;
    let peer = MessageQueue::attach(owner.desc(), true)?;

    let (started_tx, started_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();

    let handle = std::thread::spawn(move || -> tuner_conformance::core::Result<u32> {
        let _ = started_tx.send(());
        let bits = peer
            .event_flag()
            .wait(QueueNotifyBits::DATA_READY, Some(Duration::from_secs(1)))?;
        let _ = done_tx.send(());
        Ok(bits)
    });

    started_rx.recv().unwrap();
    assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());

    assert!(owner.write(b"ping"));
    owner.event_flag().wake(QueueNotifyBits::DATA_READY)?;
    done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(handle.join().unwrap()?, QueueNotifyBits::DATA_READY);

    // The matched bit was consumed by the waiter.
    assert_eq!(owner.event_flag().load() & QueueNotifyBits::DATA_READY, 0);
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn wait_ignores_bits_outside_mask() -> tuner_conformance::core::Result<()> {
    let dir = tempfile::tempdir()?;
    let queue = MessageQueue::create(dir.path().join("q.fmq"), 256)?;
    let flag = queue.event_flag();

    flag.wake(QueueNotifyBits::DATA_CONSUMED)?;
    let bits = flag.wait(QueueNotifyBits::DATA_READY, Some(Duration::from_millis(30)))?;
    assert_eq!(bits, 0);
    assert_eq!(
        flag.wait(QueueNotifyBits::DATA_CONSUMED, Some(Duration::from_millis(30)))?,
        QueueNotifyBits::DATA_CONSUMED
    );
    Ok(())
}
