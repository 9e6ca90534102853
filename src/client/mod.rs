//! Client side of the streaming protocol: callback listeners, the input
//! feeder and the filter output collector.
//!
//! ```text
//!  InputFeeder ──write──► input queue ──► service demux
//!       ▲                                     │
//!   FlowGate ◄── on_input_status ──┐          ▼ filter queues
//!                                  DemuxEvents ◄── on_filter_event
//!                                      │
//!                                      ▼
//!                         FilterOutputCollector ── compare ── golden
//! ```

pub mod collector;
pub mod demux_events;
pub mod feeder;
pub mod flow;
pub mod frontend_events;

pub use collector::FilterOutputCollector;
pub use demux_events::DemuxEvents;
pub use feeder::{FeedStats, FeederHandle, FeederOptions, InputConf, InputFeeder};
pub use flow::FlowGate;
pub use frontend_events::FrontendEvents;
