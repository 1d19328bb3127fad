use std::{fs::File, str::FromStr, sync::Mutex};

use tracing_subscriber::{filter::LevelFilter, prelude::*, Registry};

use super::error::Error;

#[derive(Debug)]
pub struct TraceConfig {
    pub level: String,
    pub format: String,
    pub file: Option<String>,
}

impl TraceConfig {
    fn level_filter(&self) -> Result<LevelFilter, Error> {
        LevelFilter::from_str(&self.level).map_err(|_| Error::InvalidLevel(self.level.clone()))
    }
}

pub fn prepare_tracing(conf: TraceConfig) -> Result<(), Error> {
    let level = conf.level_filter()?;
    let file = match &conf.file {
        Some(path) => Some(File::create(path).map_err(Error::LogFile)?),
        None => None,
    };

    if conf.format == "json" {
        let file_layer = file.map(|f| {
            tracing_subscriber::fmt::Layer::new()
                .with_ansi(false)
                .json()
                .with_writer(Mutex::new(f))
        });
        Registry::default()
            .with(file_layer)
            .with(tracing_subscriber::fmt::Layer::new().with_ansi(true).json())
            .with(level)
            .try_init()
            .map_err(Error::Init)
    } else {
        let file_layer = file.map(|f| {
            tracing_subscriber::fmt::Layer::new()
                .with_ansi(false)
                .with_writer(Mutex::new(f))
        });
        Registry::default()
            .with(file_layer)
            .with(tracing_subscriber::fmt::Layer::new().with_ansi(true))
            .with(level)
            .try_init()
            .map_err(Error::Init)
    }
}
