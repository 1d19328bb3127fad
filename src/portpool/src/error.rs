use thiserror::Error;

use super::bitset::BitSetError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("BitSet error: {0}")]
    BitSet(#[source] BitSetError),

    #[error("Invalid port range: {0}-{1}")]
    InvalidRange(i32, i32),

    #[error("Port range {0}-{1} exceeds the limit of {2} ports")]
    RangeTooLarge(i32, i32, usize),

    #[error("Requested port count must be greater than zero")]
    InvalidCount,

    #[error("Insufficient ports: {count} ports are not available on {candidates:?}")]
    InsufficientPorts {
        candidates: Vec<String>,
        count: usize,
    },

    #[error("Allocation state is not recovered yet")]
    NotRecovered,

    #[error("Allocation conflict for {0}")]
    AllocationConflict(String),
}
