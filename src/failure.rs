use thiserror::Error;

use crate::hal::{FilterId, Status};

/// Why a conformance check failed. Each variant aborts the current case
/// only.
#[derive(Debug, Error)]
pub enum Failure {
    #[error("{op} returned {status}")]
    Status { op: &'static str, status: Status },

    #[error("{op} returned {actual}, expected {expected}")]
    UnexpectedStatus {
        op: &'static str,
        expected: Status,
        actual: Status,
    },

    #[error("{op} not allowed while {state}")]
    IllegalTransition {
        op: &'static str,
        state: &'static str,
    },

    #[error("{0} not received within timeout")]
    Timeout(&'static str),

    #[error("filter {filter_id}: declared length {declared} does not match golden length {expected}")]
    LengthMismatch {
        filter_id: FilterId,
        declared: usize,
        expected: usize,
    },

    #[error("filter {filter_id}: byte {offset} is {actual:#04x}, golden output has {expected:#04x}")]
    DataMismatch {
        filter_id: FilterId,
        offset: usize,
        expected: u8,
        actual: u8,
    },

    #[error("filter {filter_id}: can't read {len} bytes from filter queue")]
    QueueRead { filter_id: FilterId, len: usize },

    #[error("write of {len} bytes into the input queue failed with {free} bytes free")]
    QueueWrite { len: usize, free: usize },

    #[error("event for unknown filter {0}")]
    UnknownFilter(FilterId),

    #[error("{0}")]
    Setup(String),

    #[error("queue: {0}")]
    Queue(#[from] crate::core::Error),

    #[error("input source: {0}")]
    Io(#[from] std::io::Error),
}

impl Failure {
    pub(crate) fn check(op: &'static str, status: Status) -> Result<(), Failure> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Failure::Status { op, status })
        }
    }

    pub(crate) fn expect(
        op: &'static str,
        expected: Status,
        actual: Status,
    ) -> Result<(), Failure> {
        if actual == expected {
            Ok(())
        } else {
            Err(Failure::UnexpectedStatus {
                op,
                expected,
                actual,
            })
        }
    }
}

pub type CheckResult<T> = std::result::Result<T, Failure>;
