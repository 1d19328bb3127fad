pub(crate) mod bitset;
pub mod error;
pub mod manager;
pub mod pool;

pub use bitset::BitSetError;
