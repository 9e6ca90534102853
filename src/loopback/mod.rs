//! In-process reference service.
//!
//! Implements the tuner boundary against real queue files so the harness
//! can be exercised without hardware: frontends lock on every tune, the
//! demux parses the fed transport stream and publishes sections, PES
//! packets or raw TS packets through the filter queues, and every callback
//! runs on one dispatcher thread.

mod demux;
mod descrambler;
mod dispatcher;
mod framer;
mod frontend;
pub mod ts;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::info;

use crate::core::Result;
use crate::hal::{Demux, DemuxId, Descrambler, Frontend, FrontendId, Status, TunerService};

use demux::LoopbackDemux;
use descrambler::LoopbackDescrambler;
use dispatcher::CallbackDispatcher;
use frontend::LoopbackFrontend;

static NEXT_INSTANCE: AtomicU32 = AtomicU32::new(0);

#[derive(Clone, Debug)]
pub struct LoopbackConfig {
    /// Frontends the service reports.
    /// Default: [0]
    pub frontend_ids: Vec<FrontendId>,

    /// Directory holding queue files. Default: system temp dir.
    pub queue_dir: PathBuf,

    /// Echo every DiSEqC message back through the frontend callback.
    /// Default: true
    pub diseqc_echo: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            frontend_ids: vec![0],
            queue_dir: std::env::temp_dir(),
            diseqc_echo: true,
        }
    }
}

/// Objects the service hands out and needs to cross-check.
pub(crate) struct Registry {
    frontend_ids: Vec<FrontendId>,
    live_demuxes: Mutex<HashSet<DemuxId>>,
}

impl Registry {
    pub(crate) fn new(frontend_ids: Vec<FrontendId>) -> Self {
        Self {
            frontend_ids,
            live_demuxes: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn has_frontend(&self, id: FrontendId) -> bool {
        self.frontend_ids.contains(&id)
    }

    pub(crate) fn demux_opened(&self, id: DemuxId) {
        self.demuxes().insert(id);
    }

    pub(crate) fn demux_closed(&self, id: DemuxId) {
        self.demuxes().remove(&id);
    }

    pub(crate) fn is_live(&self, id: DemuxId) -> bool {
        self.demuxes().contains(&id)
    }

    fn demuxes(&self) -> MutexGuard<'_, HashSet<DemuxId>> {
        self.live_demuxes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct LoopbackTuner {
    config: LoopbackConfig,
    instance: u32,
    registry: Arc<Registry>,
    dispatcher: Arc<CallbackDispatcher>,
    next_demux_id: AtomicU32,
}

impl LoopbackTuner {
    pub fn new(config: LoopbackConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.queue_dir)?;
        let dispatcher = Arc::new(CallbackDispatcher::spawn("loopback-callback")?);
        let instance = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        info!(
            "loopback tuner {instance} with frontends {:?}, queues in {}",
            config.frontend_ids,
            config.queue_dir.display()
        );
        Ok(Self {
            registry: Arc::new(Registry::new(config.frontend_ids.clone())),
            config,
            instance,
            dispatcher,
            next_demux_id: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &LoopbackConfig {
        &self.config
    }
}

impl TunerService for LoopbackTuner {
    fn frontend_ids(&self) -> std::result::Result<Vec<FrontendId>, Status> {
        Ok(self.config.frontend_ids.clone())
    }

    fn open_frontend_by_id(
        &self,
        id: FrontendId,
    ) -> std::result::Result<Arc<dyn Frontend>, Status> {
        if !self.registry.has_frontend(id) {
            return Err(Status::InvalidArgument);
        }
        Ok(Arc::new(LoopbackFrontend::new(
            id,
            self.config.diseqc_echo,
            Arc::clone(&self.dispatcher),
        )))
    }

    fn open_demux(&self) -> std::result::Result<(DemuxId, Arc<dyn Demux>), Status> {
        let id = self.next_demux_id.fetch_add(1, Ordering::Relaxed);
        let stem = format!(
            "tuner-loopback-{}-{}-demux{id}",
            std::process::id(),
            self.instance
        );
        self.registry.demux_opened(id);
        let demux = LoopbackDemux::new(
            id,
            self.config.queue_dir.clone(),
            stem,
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
        );
        Ok((id, Arc::new(demux)))
    }

    fn open_descrambler(&self) -> std::result::Result<Arc<dyn Descrambler>, Status> {
        Ok(Arc::new(LoopbackDescrambler::new(Arc::clone(&self.registry))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuner(dir: &tempfile::TempDir) -> LoopbackTuner {
        LoopbackTuner::new(LoopbackConfig {
            queue_dir: dir.path().to_path_buf(),
            ..LoopbackConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn unknown_frontend_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tuner = tuner(&dir);
        assert_eq!(tuner.frontend_ids().unwrap(), vec![0]);
        assert!(matches!(
            tuner.open_frontend_by_id(7),
            Err(Status::InvalidArgument)
        ));
    }

    #[test]
    fn demux_ids_are_distinct_and_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let tuner = tuner(&dir);
        let (a, demux_a) = tuner.open_demux().unwrap();
        let (b, _demux_b) = tuner.open_demux().unwrap();
        assert_ne!(a, b);
        assert!(tuner.registry.is_live(a));
        assert_eq!(demux_a.close(), Status::Success);
        assert!(!tuner.registry.is_live(a));
        assert!(tuner.registry.is_live(b));
    }
}
