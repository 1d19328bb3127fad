pub mod cloud;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod network;
pub mod reconciler;
pub mod server;
pub mod tls;
pub mod webhook;
