//! Service boundary of the tuner: control surfaces, callback listeners and
//! the value types that cross them.
//!
//! Control operations return a [`Status`]; operations that create an
//! object return it in `Ok` and the failing status in `Err`. Callbacks may
//! run on a context owned by the service, never on the caller's thread.

pub mod types;

use std::sync::Arc;

use crate::core::QueueDesc;

pub use types::*;

pub trait TunerService: Send + Sync {
    fn frontend_ids(&self) -> Result<Vec<FrontendId>, Status>;

    fn open_frontend_by_id(&self, id: FrontendId) -> Result<Arc<dyn Frontend>, Status>;

    fn open_demux(&self) -> Result<(DemuxId, Arc<dyn Demux>), Status>;

    fn open_descrambler(&self) -> Result<Arc<dyn Descrambler>, Status>;
}

pub trait Frontend: Send + Sync {
    fn set_callback(&self, callback: Arc<dyn FrontendCallback>) -> Status;

    fn tune(&self, settings: &FrontendSettings) -> Status;

    fn stop_tune(&self) -> Status;

    fn scan(&self, settings: &FrontendSettings, scan_type: FrontendScanType) -> Status;

    fn stop_scan(&self) -> Status;

    fn send_diseqc_message(&self, message: &[u8]) -> Status;

    fn close(&self) -> Status;
}

pub trait Demux: Send + Sync {
    fn set_frontend_data_source(&self, frontend_id: FrontendId) -> Status;

    fn add_filter(
        &self,
        filter_type: DemuxFilterType,
        buffer_size: u32,
        callback: Arc<dyn DemuxCallback>,
    ) -> Result<FilterId, Status>;

    fn get_filter_queue_desc(&self, filter_id: FilterId) -> Result<QueueDesc, Status>;

    fn configure_filter(&self, filter_id: FilterId, settings: &DemuxFilterSettings) -> Status;

    fn start_filter(&self, filter_id: FilterId) -> Status;

    fn stop_filter(&self, filter_id: FilterId) -> Status;

    fn remove_filter(&self, filter_id: FilterId) -> Status;

    fn add_input(&self, buffer_size: u32, callback: Arc<dyn DemuxCallback>) -> Status;

    fn get_input_queue_desc(&self) -> Result<QueueDesc, Status>;

    fn configure_input(&self, settings: &DemuxInputSettings) -> Status;

    fn start_input(&self) -> Status;

    fn stop_input(&self) -> Status;

    /// Releases the demux. Every filter created under it becomes invalid.
    fn close(&self) -> Status;
}

pub trait Descrambler: Send + Sync {
    /// Binds the descrambler to a demux. Binding an already bound
    /// descrambler returns [`Status::InvalidState`].
    fn set_demux_source(&self, demux_id: DemuxId) -> Status;

    fn close(&self) -> Status;
}

pub trait FrontendCallback: Send + Sync {
    fn on_event(&self, event: FrontendEventType);

    fn on_diseqc_message(&self, message: &[u8]);

    fn on_scan_message(&self, message: FrontendScanMessage);
}

pub trait DemuxCallback: Send + Sync {
    fn on_filter_event(&self, event: &DemuxFilterEvent);

    fn on_filter_status(&self, filter_id: FilterId, status: DemuxFilterStatus);

    fn on_output_status(&self, status: DemuxOutputStatus);

    fn on_input_status(&self, status: DemuxInputStatus);
}
