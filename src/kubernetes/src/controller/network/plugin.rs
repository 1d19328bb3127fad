use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;

use crate::controller::error::Error;

use super::status::network_type;

/// Lifecycle hooks a network plugin exposes to the pod controller.
/// All of them are idempotent.
#[async_trait]
pub trait NetworkPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    // Must complete before any pod hook is called.
    async fn init(&self) -> Result<(), Error>;

    async fn on_pod_added(&self, pod: Pod) -> Result<Pod, Error>;

    async fn on_pod_updated(&self, pod: Pod) -> Result<Pod, Error>;

    async fn on_pod_deleted(&self, pod: &Pod) -> Result<(), Error>;
}

#[derive(Clone, Default)]
pub struct PluginManager {
    plugins: HashMap<String, Arc<dyn NetworkPlugin>>,
}

impl PluginManager {
    pub fn new() -> PluginManager {
        PluginManager::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn NetworkPlugin>) {
        tracing::info!(plugin = plugin.name(), "register network plugin");
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NetworkPlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn plugin_for(&self, pod: &Pod) -> Option<Arc<dyn NetworkPlugin>> {
        network_type(pod).and_then(|name| self.get(name))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names = self.plugins.keys().map(|k| k.as_str()).collect::<Vec<&str>>();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    #[tracing::instrument(skip_all)]
    pub async fn init_all(&self) -> Result<(), Error> {
        for (name, plugin) in self.plugins.iter() {
            tracing::info!(plugin = name, "initialize network plugin");
            plugin.init().await?;
        }
        Ok(())
    }
}
