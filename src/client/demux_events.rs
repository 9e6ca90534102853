use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::client::collector::FilterOutputCollector;
use crate::client::flow::FlowGate;
use crate::failure::{CheckResult, Failure};
use crate::hal::{
    DemuxCallback, DemuxFilterEvent, DemuxFilterStatus, DemuxInputStatus, DemuxOutputStatus,
    FilterId,
};

#[derive(Default)]
struct DemuxEventState {
    last_events: HashMap<FilterId, DemuxFilterEvent>,
    filter_status: HashMap<FilterId, DemuxFilterStatus>,
    input_status: Option<DemuxInputStatus>,
    output_status: Option<DemuxOutputStatus>,
}

/// Listener registered for a demux's filters and input path.
///
/// Input status updates drive the feeder's [`FlowGate`]; filter events are
/// handed to the [`FilterOutputCollector`] on the delivering context.
pub struct DemuxEvents {
    state: Mutex<DemuxEventState>,
    signal: Condvar,
    gate: Arc<FlowGate>,
    collector: FilterOutputCollector,
}

impl Default for DemuxEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl DemuxEvents {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DemuxEventState::default()),
            signal: Condvar::new(),
            gate: Arc::new(FlowGate::new()),
            collector: FilterOutputCollector::new(),
        }
    }

    pub fn gate(&self) -> Arc<FlowGate> {
        Arc::clone(&self.gate)
    }

    pub fn collector(&self) -> &FilterOutputCollector {
        &self.collector
    }

    pub fn last_input_status(&self) -> Option<DemuxInputStatus> {
        self.lock().input_status
    }

    pub fn filter_status(&self, filter_id: FilterId) -> Option<DemuxFilterStatus> {
        self.lock().filter_status.get(&filter_id).copied()
    }

    pub fn last_output_status(&self) -> Option<DemuxOutputStatus> {
        self.lock().output_status
    }

    /// Waits for the next filter event naming `filter_id` and consumes it.
    pub fn wait_filter_event(
        &self,
        filter_id: FilterId,
        timeout: Duration,
    ) -> CheckResult<DemuxFilterEvent> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(event) = state.last_events.remove(&filter_id) {
                return Ok(event);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Failure::Timeout("filter event"));
            }
            state = match self.signal.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Forgets per-filter state once the demux owning the filters is gone.
    pub fn reset_filters(&self) {
        let mut state = self.lock();
        state.last_events.clear();
        state.filter_status.clear();
        drop(state);
        self.collector.detach_all();
    }

    fn lock(&self) -> MutexGuard<'_, DemuxEventState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DemuxCallback for DemuxEvents {
    fn on_filter_event(&self, event: &DemuxFilterEvent) {
        debug!(
            "filter event for {} with {} sub-events",
            event.filter_id,
            event.events.len()
        );
        self.collector.on_filter_event(event);
        self.lock().last_events.insert(event.filter_id, event.clone());
        self.signal.notify_all();
    }

    fn on_filter_status(&self, filter_id: FilterId, status: DemuxFilterStatus) {
        if status == DemuxFilterStatus::Overflow {
            warn!("filter {filter_id} overflowed");
        }
        self.lock().filter_status.insert(filter_id, status);
    }

    fn on_output_status(&self, status: DemuxOutputStatus) {
        debug!("output status {status:?}");
        self.lock().output_status = Some(status);
    }

    fn on_input_status(&self, status: DemuxInputStatus) {
        debug!("input status {status:?}");
        self.gate.apply(status);
        self.lock().input_status = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{DemuxFilterPesEvent, FilterSubEvent};

    #[test]
    fn input_status_drives_gate() {
        let events = DemuxEvents::new();
        let gate = events.gate();
        events.on_input_status(DemuxInputStatus::SpaceAlmostFull);
        assert!(!gate.is_open());
        assert_eq!(
            events.last_input_status(),
            Some(DemuxInputStatus::SpaceAlmostFull)
        );
        events.on_input_status(DemuxInputStatus::SpaceEmpty);
        assert!(gate.is_open());
    }

    #[test]
    fn filter_event_is_kept_for_waiter() {
        let events = DemuxEvents::new();
        let event = DemuxFilterEvent {
            filter_id: 3,
            events: vec![FilterSubEvent::Pes(DemuxFilterPesEvent {
                stream_id: 0xe0,
                data_length: 0,
                mpu_sequence_number: 0,
            })],
        };
        events.on_filter_event(&event);
        let received = events
            .wait_filter_event(3, Duration::from_millis(50))
            .unwrap();
        assert_eq!(received, event);
        assert!(events
            .wait_filter_event(3, Duration::from_millis(10))
            .is_err());
    }
}
