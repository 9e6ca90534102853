//! Futex-backed event-flag word shared by the two ends of a queue.
//!
//! Bits are edge hints, not counters: a woken reader re-checks the queue's
//! byte counts instead of trusting how many times it was signalled.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::core::wait::{futex_wait, futex_wake};
use crate::core::{Error, Result};

/// Notification bits carried by a queue's event-flag word.
pub struct QueueNotifyBits;

impl QueueNotifyBits {
    /// Raised by the writer after new bytes are committed.
    pub const DATA_READY: u32 = 1 << 0;
    /// Raised by the reader after bytes are consumed.
    pub const DATA_CONSUMED: u32 = 1 << 1;
}

#[derive(Clone, Copy)]
pub struct EventFlag<'a> {
    word: &'a AtomicU32,
}

impl<'a> EventFlag<'a> {
    pub fn new(word: &'a AtomicU32) -> Self {
        Self { word }
    }

    /// Sets `bits` and wakes every waiter.
    pub fn wake(&self, bits: u32) -> Result<()> {
        if bits == 0 {
            return Err(Error::Unsupported("wake with empty bit mask"));
        }
        self.word.fetch_or(bits, Ordering::SeqCst);
        futex_wake(self.word)
    }

    /// Waits until any bit in `mask` is set, then clears and returns the
    /// matched bits. Returns 0 if `timeout` expires first.
    pub fn wait(&self, mask: u32, timeout: Option<Duration>) -> Result<u32> {
        if mask == 0 {
            return Err(Error::Unsupported("wait with empty bit mask"));
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let current = self.word.load(Ordering::Acquire);
            let hit = current & mask;
            if hit != 0 {
                if self
                    .word
                    .compare_exchange(current, current & !hit, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Ok(hit);
                }
                continue;
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(0);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            futex_wait(self.word, current, remaining)?;
        }
    }

    pub fn load(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_returns_and_clears_matched_bits() {
        let word = AtomicU32::new(0);
        let flag = EventFlag::new(&word);
        flag.wake(QueueNotifyBits::DATA_READY | QueueNotifyBits::DATA_CONSUMED)
            .unwrap();

        let hit = flag
            .wait(QueueNotifyBits::DATA_READY, Some(Duration::from_millis(10)))
            .unwrap();
        assert_eq!(hit, QueueNotifyBits::DATA_READY);
        assert_eq!(flag.load(), QueueNotifyBits::DATA_CONSUMED);
    }

    #[test]
    fn wait_times_out_with_zero() {
        let word = AtomicU32::new(0);
        let flag = EventFlag::new(&word);
        let start = Instant::now();
        let hit = flag
            .wait(QueueNotifyBits::DATA_READY, Some(Duration::from_millis(20)))
            .unwrap();
        assert_eq!(hit, 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wake_from_other_thread() {
        let word = Arc::new(AtomicU32::new(0));
        let waker = Arc::clone(&word);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            EventFlag::new(&waker)
                .wake(QueueNotifyBits::DATA_CONSUMED)
                .unwrap();
        });
        let hit = EventFlag::new(&word)
            .wait(QueueNotifyBits::DATA_CONSUMED, Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(hit, QueueNotifyBits::DATA_CONSUMED);
        handle.join().unwrap();
    }

    #[test]
    fn empty_masks_are_rejected() {
        let word = AtomicU32::new(0);
        let flag = EventFlag::new(&word);
        assert!(flag.wake(0).is_err());
        assert!(flag.wait(0, None).is_err());
    }
}
