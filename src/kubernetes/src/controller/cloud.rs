use std::sync::{Arc, Mutex};

use fleetnetd_portpool::pool::PortRange;
use kube::Client;

use super::{
    config::Config,
    error::Error,
    metrics::Metrics,
    network::{
        engine::NetworkEngine,
        plugin::{NetworkPlugin, PluginManager},
    },
};

pub mod aws_nlb;
pub mod hw_elb;
pub mod jdcloud_nlb;
pub mod tencent_clb;

pub fn new_plugin(
    name: &str,
    range: PortRange,
    client: Client,
    metrics: Arc<Mutex<Metrics>>,
) -> Result<Arc<dyn NetworkPlugin>, Error> {
    let plugin: Arc<dyn NetworkPlugin> = match name {
        aws_nlb::PLUGIN_NAME => Arc::new(NetworkEngine::new(aws_nlb::AwsNlb, range, client, metrics)),
        hw_elb::PLUGIN_NAME => Arc::new(NetworkEngine::new(hw_elb::HwElb, range, client, metrics)),
        jdcloud_nlb::PLUGIN_NAME => Arc::new(NetworkEngine::new(
            jdcloud_nlb::JdCloudNlb,
            range,
            client,
            metrics,
        )),
        tencent_clb::PLUGIN_NAME => Arc::new(NetworkEngine::new(
            tencent_clb::TencentClb,
            range,
            client,
            metrics,
        )),
        _ => return Err(Error::PluginNotFound(name.to_string())),
    };
    Ok(plugin)
}

pub fn build_plugins(
    config: &Config,
    client: Client,
    metrics: Arc<Mutex<Metrics>>,
) -> Result<PluginManager, Error> {
    let mut manager = PluginManager::new();
    for (name, range) in config.plugins.ranges()? {
        manager.register(new_plugin(name, range, client.clone(), metrics.clone())?);
    }
    Ok(manager)
}
