//! Loopback demux: reads transport packets from the input queue, routes
//! them to started filters by PID and publishes framed units through each
//! filter's queue.
//!
//! Every filter event is raised only after its bytes are committed to the
//! filter queue, and each event carries exactly one unit, so the declared
//! length always equals the bytes waiting for the client.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::core::{Error, MessageQueue, QueueDesc, QueueNotifyBits, Result};
use crate::hal::{
    Demux, DemuxCallback, DemuxDataFormat, DemuxFilterEvent, DemuxFilterSettings,
    DemuxFilterStatus, DemuxFilterType, DemuxId, DemuxInputSettings, DemuxInputStatus, FilterId,
    FrontendId, Status,
};
use crate::loopback::dispatcher::CallbackDispatcher;
use crate::loopback::framer::{describe, max_unit_len, Framer};
use crate::loopback::ts::{parse_packet, TsPacket, TS_PACKET_SIZE};
use crate::loopback::Registry;

const INPUT_POLL: Duration = Duration::from_millis(50);
const CLOSE_FLUSH: Duration = Duration::from_secs(1);

struct LoopbackFilter {
    filter_type: DemuxFilterType,
    settings: Option<DemuxFilterSettings>,
    framer: Option<Framer>,
    started: bool,
    queue: MessageQueue,
    callback: Arc<dyn DemuxCallback>,
}

struct LoopbackInput {
    queue: Arc<MessageQueue>,
    callback: Arc<dyn DemuxCallback>,
    settings: Option<DemuxInputSettings>,
    last_status: Option<DemuxInputStatus>,
}

#[derive(Default)]
struct DemuxState {
    closed: bool,
    source: Option<FrontendId>,
    next_filter_id: FilterId,
    filters: BTreeMap<FilterId, LoopbackFilter>,
    input: Option<LoopbackInput>,
}

struct DemuxShared {
    id: DemuxId,
    queue_dir: PathBuf,
    queue_stem: String,
    registry: Arc<Registry>,
    dispatcher: Arc<CallbackDispatcher>,
    state: Mutex<DemuxState>,
}

struct InputWorker {
    shutdown: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub(crate) struct LoopbackDemux {
    shared: Arc<DemuxShared>,
    worker: Mutex<Option<InputWorker>>,
}

impl LoopbackDemux {
    pub(crate) fn new(
        id: DemuxId,
        queue_dir: PathBuf,
        queue_stem: String,
        registry: Arc<Registry>,
        dispatcher: Arc<CallbackDispatcher>,
    ) -> Self {
        Self {
            shared: Arc::new(DemuxShared {
                id,
                queue_dir,
                queue_stem,
                registry,
                dispatcher,
                state: Mutex::new(DemuxState::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<InputWorker>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stop_worker(&self) -> bool {
        let Some(worker) = self.lock_worker().take() else {
            return false;
        };
        worker.shutdown.store(true, Ordering::Release);
        if worker.handle.join().is_err() {
            error!("demux {} input thread panicked", self.shared.id);
        }
        true
    }

    fn with_filter(
        &self,
        filter_id: FilterId,
        op: impl FnOnce(&mut LoopbackFilter) -> Status,
    ) -> Status {
        let mut state = self.shared.lock();
        if state.closed {
            return Status::InvalidState;
        }
        match state.filters.get_mut(&filter_id) {
            Some(filter) => op(filter),
            None => Status::InvalidArgument,
        }
    }

    fn spawn_worker(&self, queue: Arc<MessageQueue>) -> std::io::Result<InputWorker> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("loopback-demux{}-input", self.shared.id))
            .spawn(move || {
                while !thread_shutdown.load(Ordering::Acquire) {
                    if let Err(err) = shared.pump_input() {
                        error!("demux {} input path failed: {err}", shared.id);
                        break;
                    }
                    if let Err(err) = queue
                        .event_flag()
                        .wait(QueueNotifyBits::DATA_READY, Some(INPUT_POLL))
                    {
                        error!("demux {} input wait failed: {err}", shared.id);
                        break;
                    }
                }
            })?;
        Ok(InputWorker { shutdown, handle })
    }
}

impl DemuxShared {
    fn lock(&self) -> MutexGuard<'_, DemuxState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn queue_path(&self, name: &str) -> PathBuf {
        self.queue_dir.join(format!("{}-{name}.fmq", self.queue_stem))
    }

    /// Drains whole packets from the input queue and routes them.
    fn pump_input(&self) -> Result<()> {
        let mut state = self.lock();
        let DemuxState {
            closed,
            filters,
            input,
            ..
        } = &mut *state;
        if *closed {
            return Ok(());
        }
        let Some(input) = input.as_mut() else {
            return Ok(());
        };
        let Some(settings) = input.settings else {
            return Ok(());
        };
        let packet_size = settings.packet_size as usize;

        let available = input.queue.available_to_read();
        self.report_input_status(input, &settings, available);
        let whole = available - available % packet_size;
        if whole == 0 {
            return Ok(());
        }
        let mut bytes = vec![0u8; whole];
        if !input.queue.read(&mut bytes) {
            return Err(Error::Corrupt("input queue shrank under its reader"));
        }
        input.queue.event_flag().wake(QueueNotifyBits::DATA_CONSUMED)?;
        let remaining = input.queue.available_to_read();
        self.report_input_status(input, &settings, remaining);
        trace!("demux {} drained {} packets", self.id, whole / packet_size);

        for raw in bytes.chunks_exact(packet_size) {
            let Some(packet) = parse_packet(raw) else {
                trace!("demux {} skipping malformed packet", self.id);
                continue;
            };
            for (&filter_id, filter) in filters.iter_mut() {
                if filter.started
                    && filter.settings.is_some_and(|s| s.tpid() == packet.pid)
                {
                    self.route(filter_id, filter, &packet, raw);
                }
            }
        }
        Ok(())
    }

    fn route(
        &self,
        filter_id: FilterId,
        filter: &mut LoopbackFilter,
        packet: &TsPacket<'_>,
        raw: &[u8],
    ) {
        let (Some(settings), Some(framer)) = (filter.settings.as_ref(), filter.framer.as_mut())
        else {
            return;
        };
        for unit in framer.push(packet, raw) {
            if unit.len() > max_unit_len(settings) {
                warn!(
                    "demux {} filter {filter_id}: {} byte unit too long for its event, dropped",
                    self.id,
                    unit.len()
                );
                self.report_overflow(filter_id, &filter.callback);
                continue;
            }
            let Some(sub_event) = describe(settings, &unit) else {
                continue;
            };
            if !filter.queue.write(&unit) {
                warn!(
                    "demux {} filter {filter_id}: {} byte unit dropped, {} bytes free",
                    self.id,
                    unit.len(),
                    filter.queue.available_to_write()
                );
                self.report_overflow(filter_id, &filter.callback);
                continue;
            }
            let callback = Arc::clone(&filter.callback);
            let event = DemuxFilterEvent {
                filter_id,
                events: vec![sub_event],
            };
            self.dispatcher.dispatch(move || callback.on_filter_event(&event));
        }
    }

    fn report_overflow(&self, filter_id: FilterId, callback: &Arc<dyn DemuxCallback>) {
        let callback = Arc::clone(callback);
        self.dispatcher
            .dispatch(move || callback.on_filter_status(filter_id, DemuxFilterStatus::Overflow));
    }

    fn report_input_status(
        &self,
        input: &mut LoopbackInput,
        settings: &DemuxInputSettings,
        available: usize,
    ) {
        let Some(status) = input_status(available, input.queue.capacity(), settings) else {
            return;
        };
        if input.last_status == Some(status) {
            return;
        }
        input.last_status = Some(status);
        if settings.status_mask & status.mask_bit() == 0 {
            return;
        }
        debug!("demux {} input status {status:?} at {available} bytes", self.id);
        let callback = Arc::clone(&input.callback);
        self.dispatcher.dispatch(move || callback.on_input_status(status));
    }
}

/// Fill level reported for `available` unread bytes. Between the two
/// thresholds the previous level stands.
fn input_status(
    available: usize,
    capacity: usize,
    settings: &DemuxInputSettings,
) -> Option<DemuxInputStatus> {
    if available == 0 {
        Some(DemuxInputStatus::SpaceEmpty)
    } else if available >= capacity {
        Some(DemuxInputStatus::SpaceFull)
    } else if available >= settings.high_threshold as usize {
        Some(DemuxInputStatus::SpaceAlmostFull)
    } else if available <= settings.low_threshold as usize {
        Some(DemuxInputStatus::SpaceAlmostEmpty)
    } else {
        None
    }
}

impl Demux for LoopbackDemux {
    fn set_frontend_data_source(&self, frontend_id: FrontendId) -> Status {
        let mut state = self.shared.lock();
        if state.closed {
            return Status::InvalidState;
        }
        if !self.shared.registry.has_frontend(frontend_id) {
            return Status::InvalidArgument;
        }
        state.source = Some(frontend_id);
        debug!("demux {} sourced from frontend {frontend_id}", self.shared.id);
        Status::Success
    }

    fn add_filter(
        &self,
        filter_type: DemuxFilterType,
        buffer_size: u32,
        callback: Arc<dyn DemuxCallback>,
    ) -> std::result::Result<FilterId, Status> {
        if buffer_size == 0 {
            return Err(Status::InvalidArgument);
        }
        let mut state = self.shared.lock();
        if state.closed {
            return Err(Status::InvalidState);
        }
        let filter_id = state.next_filter_id;
        let path = self.shared.queue_path(&format!("filter{filter_id}"));
        let queue = MessageQueue::create(&path, buffer_size as usize).map_err(|err| {
            error!("demux {}: can't create filter queue {}: {err}", self.shared.id, path.display());
            Status::OutOfMemory
        })?;
        state.next_filter_id += 1;
        state.filters.insert(
            filter_id,
            LoopbackFilter {
                filter_type,
                settings: None,
                framer: None,
                started: false,
                queue,
                callback,
            },
        );
        debug!("demux {} added {filter_type:?} filter {filter_id}", self.shared.id);
        Ok(filter_id)
    }

    fn get_filter_queue_desc(&self, filter_id: FilterId) -> std::result::Result<QueueDesc, Status> {
        let state = self.shared.lock();
        if state.closed {
            return Err(Status::InvalidState);
        }
        state
            .filters
            .get(&filter_id)
            .map(|filter| filter.queue.desc().clone())
            .ok_or(Status::InvalidArgument)
    }

    fn configure_filter(&self, filter_id: FilterId, settings: &DemuxFilterSettings) -> Status {
        self.with_filter(filter_id, |filter| {
            if filter.started {
                return Status::InvalidState;
            }
            if settings.filter_type() != filter.filter_type {
                return Status::InvalidArgument;
            }
            filter.settings = Some(*settings);
            filter.framer = Some(Framer::for_settings(settings));
            Status::Success
        })
    }

    fn start_filter(&self, filter_id: FilterId) -> Status {
        self.with_filter(filter_id, |filter| {
            if filter.started || filter.settings.is_none() {
                return Status::InvalidState;
            }
            filter.started = true;
            Status::Success
        })
    }

    fn stop_filter(&self, filter_id: FilterId) -> Status {
        self.with_filter(filter_id, |filter| {
            if !filter.started {
                return Status::InvalidState;
            }
            filter.started = false;
            filter.framer = filter.settings.as_ref().map(Framer::for_settings);
            Status::Success
        })
    }

    fn remove_filter(&self, filter_id: FilterId) -> Status {
        let mut state = self.shared.lock();
        if state.closed {
            return Status::InvalidState;
        }
        match state.filters.remove(&filter_id) {
            Some(_) => Status::Success,
            None => Status::InvalidArgument,
        }
    }

    fn add_input(&self, buffer_size: u32, callback: Arc<dyn DemuxCallback>) -> Status {
        if buffer_size == 0 {
            return Status::InvalidArgument;
        }
        let mut state = self.shared.lock();
        if state.closed || state.input.is_some() {
            return Status::InvalidState;
        }
        let path = self.shared.queue_path("input");
        match MessageQueue::create(&path, buffer_size as usize) {
            Ok(queue) => {
                state.input = Some(LoopbackInput {
                    queue: Arc::new(queue),
                    callback,
                    settings: None,
                    last_status: None,
                });
                Status::Success
            }
            Err(err) => {
                error!(
                    "demux {}: can't create input queue {}: {err}",
                    self.shared.id,
                    path.display()
                );
                Status::OutOfMemory
            }
        }
    }

    fn get_input_queue_desc(&self) -> std::result::Result<QueueDesc, Status> {
        let state = self.shared.lock();
        if state.closed {
            return Err(Status::InvalidState);
        }
        state
            .input
            .as_ref()
            .map(|input| input.queue.desc().clone())
            .ok_or(Status::InvalidState)
    }

    fn configure_input(&self, settings: &DemuxInputSettings) -> Status {
        if settings.data_format != DemuxDataFormat::Ts
            || settings.packet_size as usize != TS_PACKET_SIZE
        {
            return Status::InvalidArgument;
        }
        if self.lock_worker().is_some() {
            return Status::InvalidState;
        }
        let mut state = self.shared.lock();
        if state.closed {
            return Status::InvalidState;
        }
        match state.input.as_mut() {
            Some(input) => {
                input.settings = Some(*settings);
                Status::Success
            }
            None => Status::InvalidState,
        }
    }

    fn start_input(&self) -> Status {
        let mut worker = self.lock_worker();
        if worker.is_some() {
            return Status::InvalidState;
        }
        let queue = {
            let mut state = self.shared.lock();
            if state.closed {
                return Status::InvalidState;
            }
            let Some(input) = state.input.as_mut() else {
                return Status::InvalidState;
            };
            let Some(settings) = input.settings else {
                return Status::InvalidState;
            };
            input.last_status = None;
            let available = input.queue.available_to_read();
            self.shared.report_input_status(input, &settings, available);
            Arc::clone(&input.queue)
        };
        match self.spawn_worker(queue) {
            Ok(spawned) => {
                *worker = Some(spawned);
                info!("demux {} input started", self.shared.id);
                Status::Success
            }
            Err(err) => {
                error!("demux {}: can't start input thread: {err}", self.shared.id);
                Status::UnknownError
            }
        }
    }

    fn stop_input(&self) -> Status {
        if self.stop_worker() {
            Status::Success
        } else {
            Status::InvalidState
        }
    }

    fn close(&self) -> Status {
        if self.shared.lock().closed {
            return Status::InvalidState;
        }
        self.stop_worker();
        if !self.shared.dispatcher.flush(CLOSE_FLUSH) {
            warn!("demux {}: callbacks still queued at close", self.shared.id);
        }
        let mut state = self.shared.lock();
        if state.closed {
            return Status::InvalidState;
        }
        state.closed = true;
        state.filters.clear();
        state.input = None;
        if let Some(frontend_id) = state.source.take() {
            debug!("demux {} released frontend {frontend_id}", self.shared.id);
        }
        self.shared.registry.demux_closed(self.shared.id);
        info!("demux {} closed", self.shared.id);
        Status::Success
    }
}

impl Drop for LoopbackDemux {
    fn drop(&mut self) {
        if !self.shared.lock().closed {
            let _ = Demux::close(self);
        }
    }
}
