use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::core::wait::{futex_wait, futex_wake};
use crate::hal::DemuxInputStatus;

const GATE_OPEN: u32 = 1;
const GATE_CLOSED: u32 = 0;

/// Two-state flow-control signal between the input-status callback and the
/// feeder. Written by the callback context, read by the feeder thread.
#[derive(Debug)]
pub struct FlowGate {
    state: AtomicU32,
}

impl Default for FlowGate {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGate {
    /// A new gate starts open: the feeder may write until told otherwise.
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(GATE_OPEN),
        }
    }

    pub fn apply(&self, status: DemuxInputStatus) {
        let next = if status.allows_writing() {
            GATE_OPEN
        } else {
            GATE_CLOSED
        };
        let prev = self.state.swap(next, Ordering::AcqRel);
        if prev != next && next == GATE_OPEN {
            let _ = futex_wake(&self.state);
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == GATE_OPEN
    }

    /// Blocks until the gate opens, `shutdown` is raised, or `timeout`
    /// passes. Returns whether the gate is open.
    pub fn wait_open(&self, timeout: Duration, shutdown: &AtomicBool) -> bool {
        let deadline = Instant::now() + timeout;
        // Bounded naps so a raised shutdown flag is seen promptly.
        let nap = Duration::from_millis(20);
        loop {
            if self.is_open() {
                return true;
            }
            if shutdown.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = futex_wait(&self.state, GATE_CLOSED, Some((deadline - now).min(nap)));
        }
    }
}
