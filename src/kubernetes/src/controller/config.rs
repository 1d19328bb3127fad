use std::fs;

use fleetnetd_portpool::pool::PortRange;
use serde::{Deserialize, Serialize};

use crate::config::Tls;

use super::{
    cloud::{aws_nlb, hw_elb, jdcloud_nlb, tencent_clb},
    error::{ConfigError, Error},
};

pub const DEFAULT_HTTP_PORT: u32 = 8080;
pub const DEFAULT_HTTPS_PORT: u32 = 8443;
pub const DEFAULT_ENDPOINT: &str = "0.0.0.0";
pub const DEFAULT_REQUEUE_INTERVAL: u64 = 30 * 60;
pub const DEFAULT_TLS_CERT: &str = "/etc/fleetnetd/cert/tls.crt";
pub const DEFAULT_TLS_KEY: &str = "/etc/fleetnetd/cert/tls.key";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub http_port: u32,
    pub https_port: u32,
    pub endpoint: String,
    pub tls: Tls,
    pub requeue_interval: u64,
    pub plugins: PluginsConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PluginsConfig {
    pub aws_nlb: Option<PortRangeConfig>,
    pub hw_elb: Option<PortRangeConfig>,
    pub jdcloud_nlb: Option<PortRangeConfig>,
    pub tencent_clb: Option<PortRangeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PortRangeConfig {
    pub min_port: i32,
    pub max_port: i32,
    #[serde(default)]
    pub blocked_ports: Vec<i32>,
}

impl PortRangeConfig {
    pub fn to_range(&self, plugin: &str, limit: usize) -> Result<PortRange, Error> {
        PortRange::new(self.min_port, self.max_port, &self.blocked_ports)
            .and_then(|r| r.with_limit(limit))
            .map_err(|e| Error::Config(ConfigError::InvalidPortRange(plugin.to_string(), e.to_string())))
    }
}

impl PluginsConfig {
    // Enabled plugins with their validated ranges.
    pub fn ranges(&self) -> Result<Vec<(&'static str, PortRange)>, Error> {
        let mut res = Vec::new();
        if let Some(c) = &self.aws_nlb {
            res.push((aws_nlb::PLUGIN_NAME, c.to_range(aws_nlb::PLUGIN_NAME, aws_nlb::PORT_LIMIT)?));
        }
        if let Some(c) = &self.hw_elb {
            res.push((hw_elb::PLUGIN_NAME, c.to_range(hw_elb::PLUGIN_NAME, hw_elb::PORT_LIMIT)?));
        }
        if let Some(c) = &self.jdcloud_nlb {
            res.push((
                jdcloud_nlb::PLUGIN_NAME,
                c.to_range(jdcloud_nlb::PLUGIN_NAME, jdcloud_nlb::PORT_LIMIT)?,
            ));
        }
        if let Some(c) = &self.tencent_clb {
            res.push((
                tencent_clb::PLUGIN_NAME,
                c.to_range(tencent_clb::PLUGIN_NAME, tencent_clb::PORT_LIMIT)?,
            ));
        }
        Ok(res)
    }
}

impl Config {
    pub fn load(file: &str) -> Result<Self, Error> {
        let contents = fs::read_to_string(file).map_err(Error::StdIo)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(ConfigError::FailedToLoad(e.to_string())))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.plugins.ranges()?.is_empty() {
            return Err(Error::Config(ConfigError::NoPlugin));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            tls: Tls {
                cert: DEFAULT_TLS_CERT.to_string(),
                key: DEFAULT_TLS_KEY.to_string(),
            },
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
            plugins: PluginsConfig::default(),
        }
    }
}
