//! Drains filter queues on filter events and checks them against golden
//! output.
//!
//! Collection runs inline on the service's callback context: one drain per
//! sub-event, no extra threads. The test thread blocks in
//! [`FilterOutputCollector::wait_all_matched`] until every registered filter
//! has produced its golden output once.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::core::{MessageQueue, QueueDesc, QueueNotifyBits};
use crate::failure::{CheckResult, Failure};
use crate::hal::{DemuxFilterEvent, FilterId};

#[derive(Default)]
struct CollectorState {
    queues: HashMap<FilterId, MessageQueue>,
    pending: HashMap<FilterId, Vec<u8>>,
    observed: HashMap<FilterId, usize>,
    failures: Vec<Failure>,
}

#[derive(Default)]
pub struct FilterOutputCollector {
    state: Mutex<CollectorState>,
    changed: Condvar,
}

impl FilterOutputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches to a filter's output queue. Must happen before the filter
    /// starts, since attaching resets the queue cursors.
    pub fn attach_filter(&self, filter_id: FilterId, desc: &QueueDesc) -> CheckResult<()> {
        let queue = MessageQueue::attach(desc, true)?;
        let mut state = self.lock();
        state.queues.insert(filter_id, queue);
        state.observed.insert(filter_id, 0);
        Ok(())
    }

    /// Registers the golden output `filter_id` must produce.
    pub fn expect_output(&self, filter_id: FilterId, golden: Vec<u8>) {
        self.lock().pending.insert(filter_id, golden);
    }

    /// Drops every attached queue, expectation and recorded failure, e.g.
    /// after the demux that owned them was closed.
    pub fn detach_all(&self) {
        let mut state = self.lock();
        state.queues.clear();
        state.pending.clear();
        state.observed.clear();
        state.failures.clear();
        self.changed.notify_all();
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn events_observed(&self, filter_id: FilterId) -> usize {
        self.lock().observed.get(&filter_id).copied().unwrap_or(0)
    }

    /// Handles one filter event. Failures are recorded for the waiting test
    /// thread instead of being raised on the callback context.
    pub fn on_filter_event(&self, event: &DemuxFilterEvent) {
        let mut state = self.lock();
        if let Err(failure) = collect(&mut *state, event) {
            error!("filter {}: {failure}", event.filter_id);
            state.failures.push(failure);
        }
        self.changed.notify_all();
    }

    /// Blocks until every expected output matched, a failure was recorded,
    /// or `timeout` passes.
    pub fn wait_all_matched(&self, timeout: Duration) -> CheckResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if !state.failures.is_empty() {
                return Err(state.failures.remove(0));
            }
            if state.pending.is_empty() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "filters still pending at timeout: {:?}",
                    state.pending.keys().collect::<Vec<_>>()
                );
                return Err(Failure::Timeout("filter output matching golden output"));
            }
            state = match self.changed.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn collect(state: &mut CollectorState, event: &DemuxFilterEvent) -> CheckResult<()> {
    let filter_id = event.filter_id;
    let CollectorState {
        queues,
        pending,
        observed,
        ..
    } = state;
    let queue = queues
        .get(&filter_id)
        .ok_or(Failure::UnknownFilter(filter_id))?;

    for sub_event in &event.events {
        let declared = sub_event.data_length();
        *observed.entry(filter_id).or_insert(0) += 1;

        let mut output = vec![0u8; declared];
        let length_check = match pending.get(&filter_id) {
            Some(golden) if golden.len() != declared => Err(Failure::LengthMismatch {
                filter_id,
                declared,
                expected: golden.len(),
            }),
            _ => Ok(()),
        };
        if !queue.read(&mut output) {
            length_check?;
            return Err(Failure::QueueRead {
                filter_id,
                len: declared,
            });
        }
        queue.event_flag().wake(QueueNotifyBits::DATA_CONSUMED)?;
        length_check?;

        let Some(golden) = pending.get(&filter_id) else {
            debug!("filter {filter_id}: {declared} bytes drained after match");
            continue;
        };
        compare(filter_id, golden, &output)?;
        pending.remove(&filter_id);
        info!("filter {filter_id}: output matches golden ({declared} bytes)");
    }
    Ok(())
}

fn compare(filter_id: FilterId, golden: &[u8], output: &[u8]) -> CheckResult<()> {
    for (offset, (&expected, &actual)) in golden.iter().zip(output).enumerate() {
        if expected != actual {
            return Err(Failure::DataMismatch {
                filter_id,
                offset,
                expected,
                actual,
            });
        }
    }
    Ok(())
}
