pub mod adapter;
pub mod engine;
pub mod handshake;
pub mod params;
pub mod plugin;
pub mod service;
pub mod status;
