use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

use crate::hal::{
    Frontend, FrontendCallback, FrontendEventType, FrontendId, FrontendScanMessage,
    FrontendScanType, FrontendSettings, Status,
};
use crate::loopback::dispatcher::CallbackDispatcher;

#[derive(Default)]
struct FrontendState {
    callback: Option<Arc<dyn FrontendCallback>>,
    tuned_frequency: Option<u32>,
    closed: bool,
}

/// Frontend that locks on every tune and echoes DiSEqC messages back.
pub(crate) struct LoopbackFrontend {
    id: FrontendId,
    diseqc_echo: bool,
    dispatcher: Arc<CallbackDispatcher>,
    state: Mutex<FrontendState>,
}

impl LoopbackFrontend {
    pub(crate) fn new(
        id: FrontendId,
        diseqc_echo: bool,
        dispatcher: Arc<CallbackDispatcher>,
    ) -> Self {
        Self {
            id,
            diseqc_echo,
            dispatcher,
            state: Mutex::new(FrontendState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Callback for an operation that needs one, or the status to return.
    fn open_callback(&self) -> Result<Arc<dyn FrontendCallback>, Status> {
        let state = self.lock();
        if state.closed {
            return Err(Status::InvalidState);
        }
        state.callback.clone().ok_or(Status::InvalidState)
    }
}

impl Frontend for LoopbackFrontend {
    fn set_callback(&self, callback: Arc<dyn FrontendCallback>) -> Status {
        let mut state = self.lock();
        if state.closed {
            return Status::InvalidState;
        }
        state.callback = Some(callback);
        Status::Success
    }

    fn tune(&self, settings: &FrontendSettings) -> Status {
        let callback = match self.open_callback() {
            Ok(callback) => callback,
            Err(status) => return status,
        };
        self.lock().tuned_frequency = Some(settings.frequency());
        info!("frontend {} tuned to {} Hz", self.id, settings.frequency());
        self.dispatcher
            .dispatch(move || callback.on_event(FrontendEventType::Locked));
        Status::Success
    }

    fn stop_tune(&self) -> Status {
        let mut state = self.lock();
        if state.closed {
            return Status::InvalidState;
        }
        state.tuned_frequency = None;
        Status::Success
    }

    fn scan(&self, settings: &FrontendSettings, scan_type: FrontendScanType) -> Status {
        let callback = match self.open_callback() {
            Ok(callback) => callback,
            Err(status) => return status,
        };
        debug!(
            "frontend {} {scan_type:?} scan from {} Hz",
            self.id,
            settings.frequency()
        );
        let frequency = settings.frequency();
        self.dispatcher.dispatch(move || {
            callback.on_scan_message(FrontendScanMessage::Locked(true));
            callback.on_scan_message(FrontendScanMessage::Frequencies(vec![frequency]));
            callback.on_scan_message(FrontendScanMessage::End(true));
        });
        Status::Success
    }

    fn stop_scan(&self) -> Status {
        if self.lock().closed {
            Status::InvalidState
        } else {
            Status::Success
        }
    }

    fn send_diseqc_message(&self, message: &[u8]) -> Status {
        let callback = match self.open_callback() {
            Ok(callback) => callback,
            Err(status) => return status,
        };
        if self.diseqc_echo {
            let reply = message.to_vec();
            self.dispatcher
                .dispatch(move || callback.on_diseqc_message(&reply));
        }
        Status::Success
    }

    fn close(&self) -> Status {
        let mut state = self.lock();
        if state.closed {
            return Status::InvalidState;
        }
        state.closed = true;
        state.callback = None;
        state.tuned_frequency = None;
        debug!("frontend {} closed", self.id);
        Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FrontendEvents;
    use crate::hal::FrontendDvbtSettings;
    use std::time::Duration;

    fn frontend() -> LoopbackFrontend {
        let dispatcher = Arc::new(CallbackDispatcher::spawn("test-frontend").unwrap());
        LoopbackFrontend::new(0, true, dispatcher)
    }

    #[test]
    fn tune_without_callback_is_invalid_state() {
        let fe = frontend();
        let settings = FrontendSettings::Dvbt(FrontendDvbtSettings { frequency: 578_000 });
        assert_eq!(fe.tune(&settings), Status::InvalidState);
    }

    #[test]
    fn tune_raises_locked_event() {
        let fe = frontend();
        let events = Arc::new(FrontendEvents::new());
        assert_eq!(fe.set_callback(events.clone()), Status::Success);
        let settings = FrontendSettings::Dvbt(FrontendDvbtSettings { frequency: 578_000 });
        assert_eq!(fe.tune(&settings), Status::Success);
        assert_eq!(
            events.wait_event(Duration::from_secs(2)).unwrap(),
            FrontendEventType::Locked
        );
    }

    #[test]
    fn closed_frontend_rejects_everything() {
        let fe = frontend();
        assert_eq!(fe.close(), Status::Success);
        assert_eq!(fe.close(), Status::InvalidState);
        assert_eq!(fe.stop_tune(), Status::InvalidState);
        assert_eq!(fe.send_diseqc_message(&[0xE0]), Status::InvalidState);
    }
}
