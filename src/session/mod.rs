//! Test fixture around one tuner service.
//!
//! [`TunerEnvironment`] is built once per run and hands out a fresh
//! [`TunerSession`] per case. A session owns every handle it opens, gates
//! the operations that are legal in the current lifecycle state and closes
//! whatever is still open when it is dropped.
//!
//! Like the service's own helpers, operations that need a prerequisite
//! (a frontend, a demux) open it on first use.

mod state;

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::client::{
    DemuxEvents, FeedStats, FeederHandle, FeederOptions, FrontendEvents, InputConf, InputFeeder,
};
use crate::config::HarnessConfig;
use crate::core::QueueDesc;
use crate::failure::{CheckResult, Failure};
use crate::hal::{
    Demux, DemuxFilterSettings, DemuxFilterType, DemuxId, DemuxInputSettings, Descrambler,
    FilterId, Frontend, FrontendAtscModulation, FrontendAtscSettings, FrontendDvbtSettings,
    FrontendEventType, FrontendId, FrontendScanMessage, FrontendScanType, FrontendSettings, Status,
    TunerService,
};

pub use state::{DemuxState, DescramblerState, FilterState, FrontendState};

/// Process-wide context shared by every case of a run.
pub struct TunerEnvironment {
    service: Arc<dyn TunerService>,
    config: HarnessConfig,
}

impl TunerEnvironment {
    pub fn new(service: Arc<dyn TunerService>, config: HarnessConfig) -> Self {
        Self { service, config }
    }

    pub fn service(&self) -> &Arc<dyn TunerService> {
        &self.service
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn session(&self) -> TunerSession {
        TunerSession::new(Arc::clone(&self.service), self.config.clone())
    }
}

/// One filter of a playback run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterConf {
    pub settings: DemuxFilterSettings,
}

impl FilterConf {
    pub fn filter_type(&self) -> DemuxFilterType {
        self.settings.filter_type()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterOutcome {
    pub filter_id: FilterId,
    pub events_observed: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub filters: Vec<FilterOutcome>,
    pub feed: FeedStats,
}

struct OpenFrontend {
    id: FrontendId,
    handle: Arc<dyn Frontend>,
}

struct OpenDemux {
    id: DemuxId,
    handle: Arc<dyn Demux>,
}

pub struct TunerSession {
    service: Arc<dyn TunerService>,
    config: HarnessConfig,

    frontend: Option<OpenFrontend>,
    frontend_state: FrontendState,
    frontend_events: Arc<FrontendEvents>,

    demux: Option<OpenDemux>,
    demux_state: DemuxState,
    demux_events: Arc<DemuxEvents>,
    filters: BTreeMap<FilterId, FilterState>,
    input_added: bool,
    feeder: Option<FeederHandle>,

    descrambler: Option<Arc<dyn Descrambler>>,
    descrambler_state: DescramblerState,
}

impl TunerSession {
    pub fn new(service: Arc<dyn TunerService>, config: HarnessConfig) -> Self {
        Self {
            service,
            config,
            frontend: None,
            frontend_state: FrontendState::Unopened,
            frontend_events: Arc::new(FrontendEvents::new()),
            demux: None,
            demux_state: DemuxState::Unopened,
            demux_events: Arc::new(DemuxEvents::new()),
            filters: BTreeMap::new(),
            input_added: false,
            feeder: None,
            descrambler: None,
            descrambler_state: DescramblerState::Unopened,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn frontend_state(&self) -> FrontendState {
        self.frontend_state
    }

    pub fn demux_state(&self) -> DemuxState {
        self.demux_state
    }

    pub fn descrambler_state(&self) -> DescramblerState {
        self.descrambler_state
    }

    pub fn filter_state(&self, filter_id: FilterId) -> Option<FilterState> {
        self.filters.get(&filter_id).copied()
    }

    pub fn frontend_events(&self) -> &Arc<FrontendEvents> {
        &self.frontend_events
    }

    pub fn demux_events(&self) -> &Arc<DemuxEvents> {
        &self.demux_events
    }

    /// The open demux handle, if any. A clone kept past `close_demux`
    /// still reaches the service, which must reject it.
    pub fn demux(&self) -> Option<(DemuxId, Arc<dyn Demux>)> {
        self.demux
            .as_ref()
            .map(|demux| (demux.id, Arc::clone(&demux.handle)))
    }

    // Frontend

    pub fn frontend_ids(&self) -> CheckResult<Vec<FrontendId>> {
        self.service
            .frontend_ids()
            .map_err(|status| Failure::Status {
                op: "get frontend ids",
                status,
            })
    }

    /// Opens `frontend_id` and registers a fresh listener on it. A frontend
    /// that is already open is closed first.
    pub fn create_frontend(&mut self, frontend_id: FrontendId) -> CheckResult<()> {
        self.release_frontend();
        let handle = self
            .service
            .open_frontend_by_id(frontend_id)
            .map_err(|status| Failure::Status {
                op: "open frontend",
                status,
            })?;
        let events = Arc::new(FrontendEvents::new());
        let status = handle.set_callback(events.clone());
        if let Err(failure) = Failure::check("set frontend callback", status) {
            let _ = handle.close();
            return Err(failure);
        }
        self.frontend = Some(OpenFrontend {
            id: frontend_id,
            handle,
        });
        self.frontend_events = events;
        self.frontend_state = FrontendState::Opened;
        info!("frontend {frontend_id} opened");
        Ok(())
    }

    /// Opens `frontend_id` and tunes it with ATSC then DVB-T settings,
    /// waiting for a frontend event after each tune.
    pub fn tune_frontend(&mut self, frontend_id: FrontendId) -> CheckResult<()> {
        self.create_frontend(frontend_id)?;
        let atsc = FrontendSettings::Atsc(FrontendAtscSettings {
            frequency: 0,
            modulation: FrontendAtscModulation::Undefined,
        });
        let dvbt = FrontendSettings::Dvbt(FrontendDvbtSettings { frequency: 0 });
        for settings in [atsc, dvbt] {
            let event = self.tune(&settings)?;
            debug!("frontend {frontend_id} reported {event:?}");
        }
        Ok(())
    }

    /// Tunes the open frontend and waits for its event.
    pub fn tune(&mut self, settings: &FrontendSettings) -> CheckResult<FrontendEventType> {
        let handle = self.open_frontend("tune frontend")?;
        Failure::check("tune frontend", handle.tune(settings))?;
        self.frontend_state = FrontendState::Tuned;
        self.frontend_events.wait_event(self.config.wait_timeout())
    }

    pub fn stop_tune_frontend(&mut self, frontend_id: FrontendId) -> CheckResult<()> {
        let handle = self.ensure_frontend(frontend_id)?;
        Failure::check("stop tune", handle.stop_tune())?;
        self.frontend_state = FrontendState::Stopped;
        Ok(())
    }

    pub fn close_frontend(&mut self, frontend_id: FrontendId) -> CheckResult<()> {
        let handle = self.ensure_frontend(frontend_id)?;
        let status = handle.close();
        self.frontend = None;
        self.frontend_state = FrontendState::Closed;
        Failure::check("close frontend", status)?;
        info!("frontend {frontend_id} closed");
        Ok(())
    }

    /// Sends a DiSEqC message and returns the message the frontend replies
    /// with.
    pub fn send_diseqc_message(
        &mut self,
        frontend_id: FrontendId,
        message: &[u8],
    ) -> CheckResult<Vec<u8>> {
        let handle = self.ensure_frontend(frontend_id)?;
        Failure::check("send diseqc message", handle.send_diseqc_message(message))?;
        self.frontend_events
            .wait_diseqc_message(self.config.wait_timeout())
    }

    /// Runs an automatic scan and returns every scan message up to the end
    /// message.
    pub fn scan_frontend(
        &mut self,
        frontend_id: FrontendId,
        settings: &FrontendSettings,
    ) -> CheckResult<Vec<FrontendScanMessage>> {
        let handle = self.ensure_frontend(frontend_id)?;
        Failure::check("scan frontend", handle.scan(settings, FrontendScanType::Auto))?;
        let messages = self
            .frontend_events
            .wait_scan_end(self.config.wait_timeout())?;
        Failure::check("stop scan", handle.stop_scan())?;
        Ok(messages)
    }

    fn open_frontend(&self, op: &'static str) -> CheckResult<Arc<dyn Frontend>> {
        match &self.frontend {
            Some(frontend) if self.frontend_state.is_open() => Ok(Arc::clone(&frontend.handle)),
            _ => Err(Failure::IllegalTransition {
                op,
                state: self.frontend_state.name(),
            }),
        }
    }

    fn ensure_frontend(&mut self, frontend_id: FrontendId) -> CheckResult<Arc<dyn Frontend>> {
        let reusable = self
            .frontend
            .as_ref()
            .is_some_and(|frontend| frontend.id == frontend_id);
        if !reusable || !self.frontend_state.is_open() {
            self.create_frontend(frontend_id)?;
        }
        self.open_frontend("use frontend")
    }

    fn release_frontend(&mut self) {
        if let Some(frontend) = self.frontend.take() {
            let status = frontend.handle.close();
            if !status.is_success() {
                warn!("closing frontend {} returned {status}", frontend.id);
            }
            self.frontend_state = FrontendState::Closed;
        }
    }

    // Demux

    pub fn create_demux(&mut self) -> CheckResult<DemuxId> {
        if self.demux_state.is_open() {
            return Err(Failure::IllegalTransition {
                op: "open demux",
                state: self.demux_state.name(),
            });
        }
        let (id, handle) = self.service.open_demux().map_err(|status| Failure::Status {
            op: "open demux",
            status,
        })?;
        self.demux = Some(OpenDemux { id, handle });
        self.demux_state = DemuxState::Opened;
        info!("demux {id} opened");
        Ok(id)
    }

    pub fn create_demux_with_frontend(&mut self, frontend_id: FrontendId) -> CheckResult<DemuxId> {
        let (demux_id, demux) = self.ensure_demux()?;
        if !self
            .frontend
            .as_ref()
            .is_some_and(|frontend| frontend.id == frontend_id)
            || !self.frontend_state.is_open()
        {
            self.create_frontend(frontend_id)?;
        }
        Failure::check(
            "set frontend data source",
            demux.set_frontend_data_source(frontend_id),
        )?;
        self.demux_state = DemuxState::SourceBound;
        Ok(demux_id)
    }

    /// Closes the demux. Its filters and input go with it, on both sides.
    pub fn close_demux(&mut self) -> CheckResult<()> {
        let (demux_id, demux) = self.ensure_demux()?;
        if let Some(feeder) = self.feeder.take() {
            if let Err(failure) = feeder.stop() {
                warn!("input feeder failed before demux close: {failure}");
            }
        }
        let status = demux.close();
        self.demux = None;
        self.demux_state = DemuxState::Closed;
        self.filters.clear();
        self.input_added = false;
        self.demux_events.reset_filters();
        Failure::check("close demux", status)?;
        info!("demux {demux_id} closed");
        Ok(())
    }

    pub fn add_input_to_demux(&mut self, settings: &DemuxInputSettings) -> CheckResult<()> {
        let (_, demux) = self.ensure_demux()?;
        if self.input_added {
            return Err(Failure::IllegalTransition {
                op: "add input",
                state: "input already added",
            });
        }
        Failure::check(
            "add input",
            demux.add_input(self.config.input_queue_size, self.demux_events.clone()),
        )?;
        self.input_added = true;
        Failure::check("configure input", demux.configure_input(settings))
    }

    pub fn get_input_queue_desc(&mut self) -> CheckResult<QueueDesc> {
        let (_, demux) = self.ensure_demux()?;
        demux.get_input_queue_desc().map_err(|status| Failure::Status {
            op: "get input queue descriptor",
            status,
        })
    }

    /// Adds a filter of the type `settings` describe and configures it.
    pub fn add_filter_to_demux(&mut self, settings: &DemuxFilterSettings) -> CheckResult<FilterId> {
        let (demux_id, demux) = self.ensure_demux()?;
        let filter_type = settings.filter_type();
        let filter_id = demux
            .add_filter(
                filter_type,
                self.config.filter_queue_size,
                self.demux_events.clone(),
            )
            .map_err(|status| Failure::Status {
                op: "add filter",
                status,
            })?;
        self.filters.insert(filter_id, FilterState::Added);
        Failure::check("configure filter", demux.configure_filter(filter_id, settings))?;
        self.filters.insert(filter_id, FilterState::Configured);
        debug!(
            "demux {demux_id}: {filter_type:?} filter {filter_id} on tpid {:#x}",
            settings.tpid()
        );
        Ok(filter_id)
    }

    pub fn get_filter_queue_desc(&self, filter_id: FilterId) -> CheckResult<QueueDesc> {
        let demux = self.open_demux("get filter queue descriptor")?;
        demux
            .get_filter_queue_desc(filter_id)
            .map_err(|status| Failure::Status {
                op: "get filter queue descriptor",
                status,
            })
    }

    pub fn start_filter(&mut self, filter_id: FilterId) -> CheckResult<()> {
        let demux = self.open_demux("start filter")?;
        let state = self.known_filter("start filter", filter_id)?;
        if !state.can_start() {
            return Err(Failure::IllegalTransition {
                op: "start filter",
                state: state.name(),
            });
        }
        Failure::check("start filter", demux.start_filter(filter_id))?;
        self.filters.insert(filter_id, FilterState::Started);
        Ok(())
    }

    pub fn stop_filter(&mut self, filter_id: FilterId) -> CheckResult<()> {
        let demux = self.open_demux("stop filter")?;
        let state = self.known_filter("stop filter", filter_id)?;
        if state != FilterState::Started {
            return Err(Failure::IllegalTransition {
                op: "stop filter",
                state: state.name(),
            });
        }
        Failure::check("stop filter", demux.stop_filter(filter_id))?;
        self.filters.insert(filter_id, FilterState::Stopped);
        Ok(())
    }

    /// Streams `input` through the demux into one filter per entry of
    /// `filters`, then checks each filter's output against the golden
    /// buffer at the same index. The demux is closed on success.
    pub fn playback_data_flow_test(
        &mut self,
        filters: &[FilterConf],
        input: &InputConf,
        goldens: Vec<Vec<u8>>,
    ) -> CheckResult<PlaybackReport> {
        if filters.len() != goldens.len() {
            return Err(Failure::Setup(format!(
                "{} filters but {} golden outputs",
                filters.len(),
                goldens.len()
            )));
        }
        let timeout = self.config.wait_timeout();
        let events = Arc::clone(&self.demux_events);

        let mut filter_ids = Vec::with_capacity(filters.len());
        for (conf, golden) in filters.iter().zip(goldens) {
            let filter_id = self.add_filter_to_demux(&conf.settings)?;
            let desc = self.get_filter_queue_desc(filter_id)?;
            events.collector().attach_filter(filter_id, &desc)?;
            events.collector().expect_output(filter_id, golden);
            self.start_filter(filter_id)?;
            filter_ids.push(filter_id);
        }

        self.add_input_to_demux(&input.settings)?;
        let desc = self.get_input_queue_desc()?;
        let options = FeederOptions {
            chunk_packets: self.config.chunk_packets,
            space_timeout: timeout,
        };
        self.feeder = Some(InputFeeder::spawn(desc, input.clone(), events.gate(), options)?);
        let demux = self.open_demux("start input")?;
        Failure::check("start input", demux.start_input())?;

        events.collector().wait_all_matched(timeout)?;
        let outcomes = filter_ids
            .iter()
            .map(|&filter_id| FilterOutcome {
                filter_id,
                events_observed: events.collector().events_observed(filter_id),
            })
            .collect();
        let feed = match self.feeder.take() {
            Some(feeder) => feeder.join_within(timeout)?,
            None => FeedStats::default(),
        };
        info!(
            "playback matched {} filters after {} input bytes",
            filter_ids.len(),
            feed.bytes_written
        );

        self.close_demux()?;
        Ok(PlaybackReport {
            filters: outcomes,
            feed,
        })
    }

    fn open_demux(&self, op: &'static str) -> CheckResult<Arc<dyn Demux>> {
        match &self.demux {
            Some(demux) if self.demux_state.is_open() => Ok(Arc::clone(&demux.handle)),
            _ => Err(Failure::IllegalTransition {
                op,
                state: self.demux_state.name(),
            }),
        }
    }

    fn ensure_demux(&mut self) -> CheckResult<(DemuxId, Arc<dyn Demux>)> {
        if !self.demux_state.is_open() {
            self.create_demux()?;
        }
        match &self.demux {
            Some(demux) => Ok((demux.id, Arc::clone(&demux.handle))),
            None => Err(Failure::IllegalTransition {
                op: "use demux",
                state: self.demux_state.name(),
            }),
        }
    }

    fn known_filter(&self, op: &'static str, filter_id: FilterId) -> CheckResult<FilterState> {
        self.filters
            .get(&filter_id)
            .copied()
            .ok_or(Failure::IllegalTransition {
                op,
                state: "filter unknown to the open demux",
            })
    }

    // Descrambler

    /// Opens a descrambler, binds it to the demux and checks that binding
    /// it a second time is refused with `InvalidState`.
    pub fn create_descrambler(&mut self) -> CheckResult<()> {
        if self.descrambler_state.is_open() {
            return Err(Failure::IllegalTransition {
                op: "open descrambler",
                state: self.descrambler_state.name(),
            });
        }
        let descrambler = self
            .service
            .open_descrambler()
            .map_err(|status| Failure::Status {
                op: "open descrambler",
                status,
            })?;
        self.descrambler = Some(Arc::clone(&descrambler));
        self.descrambler_state = DescramblerState::Opened;

        let (demux_id, _) = self.ensure_demux()?;
        Failure::check("set demux source", descrambler.set_demux_source(demux_id))?;
        self.descrambler_state = DescramblerState::SourceBound;
        info!("descrambler bound to demux {demux_id}");

        Failure::expect(
            "set demux source again",
            Status::InvalidState,
            descrambler.set_demux_source(demux_id),
        )
    }

    pub fn close_descrambler(&mut self) -> CheckResult<()> {
        if !self.descrambler_state.is_open() {
            self.create_descrambler()?;
        }
        let Some(descrambler) = self.descrambler.take() else {
            return Err(Failure::IllegalTransition {
                op: "close descrambler",
                state: self.descrambler_state.name(),
            });
        };
        self.descrambler_state = DescramblerState::Closed;
        Failure::check("close descrambler", descrambler.close())
    }
}

impl Drop for TunerSession {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            if let Err(failure) = feeder.stop() {
                warn!("input feeder failed during teardown: {failure}");
            }
        }
        if let Some(descrambler) = self.descrambler.take() {
            let status = descrambler.close();
            if !status.is_success() {
                warn!("closing descrambler during teardown returned {status}");
            }
        }
        if let Some(demux) = self.demux.take() {
            let status = demux.handle.close();
            if !status.is_success() {
                warn!("closing demux {} during teardown returned {status}", demux.id);
            }
            self.demux_events.reset_filters();
        }
        self.release_frontend();
    }
}
