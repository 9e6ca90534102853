//! Background producer that streams a file into the input queue.

use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::client::flow::FlowGate;
use crate::core::{MessageQueue, QueueDesc, QueueNotifyBits};
use crate::failure::{CheckResult, Failure};
use crate::hal::DemuxInputSettings;

const GATE_POLL: Duration = Duration::from_millis(100);
const JOIN_POLL: Duration = Duration::from_millis(10);

/// Source file plus the settings the input path was configured with.
#[derive(Clone, Debug)]
pub struct InputConf {
    pub input_file: PathBuf,
    pub settings: DemuxInputSettings,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub bytes_written: u64,
    pub chunks_written: u64,
    /// Bytes of a trailing partial packet that were not sent.
    pub dropped_tail: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct FeederOptions {
    pub chunk_packets: usize,
    /// Bound on waiting for the service to free queue space.
    pub space_timeout: Duration,
}

pub struct InputFeeder;

impl InputFeeder {
    /// Starts the feeder thread. The thread attaches to `desc`, so the
    /// descriptor must come from a configured input path.
    pub fn spawn(
        desc: QueueDesc,
        conf: InputConf,
        gate: Arc<FlowGate>,
        options: FeederOptions,
    ) -> CheckResult<FeederHandle> {
        if conf.settings.packet_size == 0 || options.chunk_packets == 0 {
            return Err(Failure::Setup("feeder needs a non-zero packet size".into()));
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("playback-input".to_string())
            .spawn(move || feed(&desc, &conf, &gate, options, &thread_shutdown))?;
        Ok(FeederHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Owns the feeder thread; dropping it stops and joins the thread.
pub struct FeederHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<CheckResult<FeedStats>>>,
}

impl FeederHandle {
    /// Waits for the feeder to finish the source and returns its outcome.
    pub fn join(mut self) -> CheckResult<FeedStats> {
        self.join_inner()
    }

    /// Like [`join`](Self::join), but gives up after `timeout`: the feeder
    /// is then stopped and the wait fails with [`Failure::Timeout`].
    pub fn join_within(mut self, timeout: Duration) -> CheckResult<FeedStats> {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                warn!("input feeder still running after {timeout:?}, stopping it");
                self.shutdown.store(true, Ordering::Release);
                if let Err(err) = self.join_inner() {
                    debug!("stopped input feeder ended with: {err}");
                }
                return Err(Failure::Timeout("input feeder completion"));
            }
            thread::sleep(JOIN_POLL);
        }
        self.join_inner()
    }

    /// Asks the feeder to stop at its next chunk boundary and joins it.
    pub fn stop(mut self) -> CheckResult<FeedStats> {
        self.shutdown.store(true, Ordering::Release);
        self.join_inner()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn join_inner(&mut self) -> CheckResult<FeedStats> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Failure::Setup("input feeder thread panicked".into()))?,
            None => Ok(FeedStats::default()),
        }
    }
}

impl Drop for FeederHandle {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shutdown.store(true, Ordering::Release);
            if let Err(err) = self.join_inner() {
                warn!("input feeder ended with failure during teardown: {err}");
            }
        }
    }
}

fn feed(
    desc: &QueueDesc,
    conf: &InputConf,
    gate: &FlowGate,
    options: FeederOptions,
    shutdown: &AtomicBool,
) -> CheckResult<FeedStats> {
    let queue = MessageQueue::attach(desc, true)?;
    let mut source = File::open(&conf.input_file)?;
    let packet_size = conf.settings.packet_size as usize;
    let chunk_len = packet_size * options.chunk_packets;
    if chunk_len > queue.capacity() {
        return Err(Failure::Setup(format!(
            "feeder chunk of {chunk_len} bytes exceeds input queue capacity {}",
            queue.capacity()
        )));
    }

    info!(
        "feeding {} in chunks of {} packets ({} bytes)",
        conf.input_file.display(),
        options.chunk_packets,
        chunk_len
    );
    let mut buffer = vec![0u8; chunk_len];
    let mut stats = FeedStats::default();
    loop {
        while !gate.wait_open(GATE_POLL, shutdown) {
            if shutdown.load(Ordering::Acquire) {
                debug!("input feeder stopped while paused");
                return Ok(stats);
            }
        }
        if shutdown.load(Ordering::Acquire) {
            return Ok(stats);
        }

        let filled = read_full(&mut source, &mut buffer)?;
        let aligned = filled / packet_size * packet_size;
        if aligned > 0 {
            if !wait_for_space(&queue, aligned, options.space_timeout, shutdown)? {
                return Ok(stats);
            }
            let free = queue.available_to_write();
            if !queue.write(&buffer[..aligned]) {
                return Err(Failure::QueueWrite { len: aligned, free });
            }
            queue.event_flag().wake(QueueNotifyBits::DATA_READY)?;
            stats.bytes_written += aligned as u64;
            stats.chunks_written += 1;
        }
        if filled < chunk_len {
            stats.dropped_tail = filled - aligned;
            if stats.dropped_tail > 0 {
                debug!(
                    "dropping {} trailing bytes short of a full packet",
                    stats.dropped_tail
                );
            }
            break;
        }
    }
    info!(
        "input feeder done: {} bytes in {} chunks",
        stats.bytes_written, stats.chunks_written
    );
    Ok(stats)
}

/// Reads until `buf` is full or the source ends; returns bytes read.
fn read_full(source: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Waits on `DATA_CONSUMED` until `len` bytes are free. Returns false if
/// shutdown was requested.
fn wait_for_space(
    queue: &MessageQueue,
    len: usize,
    timeout: Duration,
    shutdown: &AtomicBool,
) -> CheckResult<bool> {
    let deadline = Instant::now() + timeout;
    let flag = queue.event_flag();
    while queue.available_to_write() < len {
        if shutdown.load(Ordering::Acquire) {
            return Ok(false);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(Failure::Timeout("input queue space"));
        }
        flag.wait(
            QueueNotifyBits::DATA_CONSUMED,
            Some((deadline - now).min(GATE_POLL)),
        )?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_full_stops_at_end_of_source() {
        let mut source = Cursor::new(vec![7u8; 10]);
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut source, &mut buf).unwrap(), 8);
        assert_eq!(read_full(&mut source, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut source, &mut buf).unwrap(), 0);
    }
}
