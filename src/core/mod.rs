//! Shared-memory queue primitives: the mapped ring, its control header and
//! the futex-backed event-flag word.

pub mod control;
pub mod error;
pub mod event_flag;
pub mod mmap;
pub mod queue;
pub mod wait;

pub use error::{Error, Result};
pub use event_flag::{EventFlag, QueueNotifyBits};
pub use queue::{MessageQueue, QueueDesc};
