use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
pub use kube::{
    runtime::{controller::Action, events::Reporter},
    Client, Resource,
};
use serde::Serialize;
use tokio::sync::RwLock;

use fleetnetd_trace::error::TraceableError;

use super::metrics::Metrics;

pub const ERROR_REQUEUE: Duration = Duration::from_secs(10);

pub trait Ctx {
    fn metrics(&self) -> Arc<Mutex<Metrics>>;
    fn client(&self) -> &Client;
}

/// Shared by every reconciler of the process.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    // Requeue interval of settled objects in seconds
    pub interval: u64,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub metrics: Arc<Mutex<Metrics>>,
}

impl Ctx for Context {
    fn client(&self) -> &Client {
        &self.client
    }

    fn metrics(&self) -> Arc<Mutex<Metrics>> {
        self.metrics.clone()
    }
}

/// A context carrying the component one reconciler works with,
/// the plugin set for the pod watcher or the poll policy for handshakes.
pub struct ContextWith<T: Clone> {
    pub(crate) inner: Context,
    pub component: T,
}

impl<T: Clone> ContextWith<T> {
    pub fn interval(&self) -> u64 {
        self.inner.interval
    }

    pub async fn record_event(&self) {
        self.inner.diagnostics.write().await.last_event = Utc::now();
    }
}

impl<T: Clone> Ctx for ContextWith<T> {
    fn client(&self) -> &Client {
        &self.inner.client
    }

    fn metrics(&self) -> Arc<Mutex<Metrics>> {
        self.inner.metrics.clone()
    }
}

/// Process wide state shared between reconcilers and the web server.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub registry: prometheus::Registry,
}

impl State {
    pub fn new(component: &str) -> State {
        State {
            diagnostics: Arc::new(RwLock::new(Diagnostics::new(component))),
            registry: prometheus::Registry::default(),
        }
    }

    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Set once every plugin has rebuilt its allocations.
    pub async fn mark_recovered(&self, plugins: Vec<String>) {
        let mut diagnostics = self.diagnostics.write().await;
        diagnostics.plugins = plugins;
        diagnostics.recovered = true;
        diagnostics.last_event = Utc::now();
    }

    pub async fn is_ready(&self) -> bool {
        self.diagnostics.read().await.recovered
    }

    pub fn to_context_with<T: Clone>(
        &self,
        client: Client,
        interval: u64,
        component: T,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Arc<ContextWith<T>> {
        Arc::new(ContextWith {
            inner: Context {
                client,
                interval,
                diagnostics: self.diagnostics.clone(),
                metrics,
            },
            component,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    pub plugins: Vec<String>,
    pub recovered: bool,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Diagnostics {
    pub fn new(component: &str) -> Self {
        Self {
            last_event: Utc::now(),
            plugins: Vec::new(),
            recovered: false,
            reporter: component.into(),
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics::new("fleetnetd")
    }
}

#[tracing::instrument(skip_all)]
pub fn error_policy<T: Resource<DynamicType = ()>, E: TraceableError, C: Ctx>(
    resource: Arc<T>,
    error: &E,
    ctx: Arc<C>,
) -> Action {
    tracing::warn!(error = error.metric_label(), "reconcile failed: {:?}", error);
    if let Ok(metrics) = ctx.metrics().lock() {
        metrics.reconcile_failure(resource.as_ref(), error);
    }
    Action::requeue(ERROR_REQUEUE)
}
