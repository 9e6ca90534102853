//! Conformance client for a tuner service's streaming data plane.
//!
//! Payload bytes move from an input file through a shared-memory queue into
//! the service's demux and come back out through one queue per filter,
//! announced by filter events. The client checks lifecycle transitions and
//! compares every filter's output byte for byte against golden data.

pub mod cases;
pub mod client;
pub mod config;
pub mod core;
pub mod failure;
pub mod hal;
pub mod loopback;
pub mod session;

pub use config::{ConfigError, HarnessConfig};
pub use failure::{CheckResult, Failure};
pub use session::{TunerEnvironment, TunerSession};
