use thiserror::Error;

pub trait TraceableError: std::error::Error {
    fn metric_label(&self) -> String;
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to open log file: {0}")]
    LogFile(#[source] std::io::Error),

    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Failed to initialize subscriber: {0}")]
    Init(#[source] tracing_subscriber::util::TryInitError),
}
