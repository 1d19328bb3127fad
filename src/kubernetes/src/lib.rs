pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
#[cfg(test)]
pub(crate) mod fixture;
pub mod util;
