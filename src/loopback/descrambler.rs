use std::sync::{Arc, Mutex};

use log::debug;

use crate::hal::{DemuxId, Descrambler, Status};
use crate::loopback::Registry;

#[derive(Default)]
struct DescramblerState {
    source: Option<DemuxId>,
    closed: bool,
}

/// Descrambler that binds to exactly one live demux for its lifetime.
pub(crate) struct LoopbackDescrambler {
    registry: Arc<Registry>,
    state: Mutex<DescramblerState>,
}

impl LoopbackDescrambler {
    pub(crate) fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            state: Mutex::new(DescramblerState::default()),
        }
    }
}

impl Descrambler for LoopbackDescrambler {
    fn set_demux_source(&self, demux_id: DemuxId) -> Status {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.closed || state.source.is_some() {
            return Status::InvalidState;
        }
        if !self.registry.is_live(demux_id) {
            return Status::InvalidArgument;
        }
        state.source = Some(demux_id);
        debug!("descrambler bound to demux {demux_id}");
        Status::Success
    }

    fn close(&self) -> Status {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.closed {
            return Status::InvalidState;
        }
        state.closed = true;
        state.source = None;
        Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_bind_is_invalid_state() {
        let registry = Arc::new(Registry::new(vec![0]));
        registry.demux_opened(2);
        let descrambler = LoopbackDescrambler::new(registry);
        assert_eq!(descrambler.set_demux_source(9), Status::InvalidArgument);
        assert_eq!(descrambler.set_demux_source(2), Status::Success);
        assert_eq!(descrambler.set_demux_source(2), Status::InvalidState);
        assert_eq!(descrambler.close(), Status::Success);
        assert_eq!(descrambler.close(), Status::InvalidState);
    }
}
