use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::debug;

use crate::failure::{CheckResult, Failure};
use crate::hal::{FrontendCallback, FrontendEventType, FrontendScanMessage};

#[derive(Default)]
struct FrontendEventState {
    event: Option<FrontendEventType>,
    diseqc_message: Option<Vec<u8>>,
    scan_messages: Vec<FrontendScanMessage>,
    scan_ended: bool,
}

/// Listener registered on a frontend. Each `wait_*` consumes the outcome it
/// observed, so a second tune waits for a second event.
#[derive(Default)]
pub struct FrontendEvents {
    state: Mutex<FrontendEventState>,
    signal: Condvar,
}

impl FrontendEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wait_event(&self, timeout: Duration) -> CheckResult<FrontendEventType> {
        self.wait_for("frontend event", timeout, |state| state.event.take())
    }

    pub fn wait_diseqc_message(&self, timeout: Duration) -> CheckResult<Vec<u8>> {
        self.wait_for("diseqc message", timeout, |state| {
            state.diseqc_message.take()
        })
    }

    /// Waits for the end-of-scan message and returns every scan message
    /// received up to and including it.
    pub fn wait_scan_end(&self, timeout: Duration) -> CheckResult<Vec<FrontendScanMessage>> {
        self.wait_for("scan end message", timeout, |state| {
            if state.scan_ended {
                state.scan_ended = false;
                Some(std::mem::take(&mut state.scan_messages))
            } else {
                None
            }
        })
    }

    fn wait_for<T>(
        &self,
        what: &'static str,
        timeout: Duration,
        mut take: impl FnMut(&mut FrontendEventState) -> Option<T>,
    ) -> CheckResult<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(value) = take(&mut *state) {
                return Ok(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Failure::Timeout(what));
            }
            state = match self.signal.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontendEventState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrontendCallback for FrontendEvents {
    fn on_event(&self, event: FrontendEventType) {
        debug!("frontend event {event:?}");
        self.lock().event = Some(event);
        self.signal.notify_all();
    }

    fn on_diseqc_message(&self, message: &[u8]) {
        debug!("diseqc message of {} bytes", message.len());
        self.lock().diseqc_message = Some(message.to_vec());
        self.signal.notify_all();
    }

    fn on_scan_message(&self, message: FrontendScanMessage) {
        let mut state = self.lock();
        if matches!(message, FrontendScanMessage::End(_)) {
            state.scan_ended = true;
        }
        state.scan_messages.push(message);
        drop(state);
        self.signal.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn event_from_other_thread_is_observed_once() {
        let events = Arc::new(FrontendEvents::new());
        let callback = Arc::clone(&events);
        let handle = thread::spawn(move || callback.on_event(FrontendEventType::Locked));

        let event = events.wait_event(Duration::from_secs(2)).unwrap();
        assert_eq!(event, FrontendEventType::Locked);
        handle.join().unwrap();

        assert!(matches!(
            events.wait_event(Duration::from_millis(20)),
            Err(Failure::Timeout("frontend event"))
        ));
    }

    #[test]
    fn scan_messages_collected_until_end() {
        let events = FrontendEvents::new();
        events.on_scan_message(FrontendScanMessage::Locked(true));
        events.on_scan_message(FrontendScanMessage::End(true));
        let messages = events.wait_scan_end(Duration::from_millis(50)).unwrap();
        assert_eq!(
            messages,
            vec![
                FrontendScanMessage::Locked(true),
                FrontendScanMessage::End(true)
            ]
        );
    }
}
