use fleetnetd_trace::error::TraceableError;
use kube::Resource;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec};
use prometheus::{IntGaugeVec, Registry};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub allocated_ports: IntGaugeVec,
    pub max_ports: IntGaugeVec,
    pub network_ready: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "fleetnetd_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &[],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "fleetnetd_reconciliation_errors_total",
                "Total count of reconciliation errors",
            ),
            &["resource", "instance", "error"],
        )
        .unwrap();
        let reconciliations = IntCounterVec::new(
            opts!(
                "fleetnetd_reconciliation_total",
                "Total count of reconciliations",
            ),
            &["resource", "instance"],
        )
        .unwrap();
        let allocated_ports = IntGaugeVec::new(
            opts!(
                "fleetnetd_allocated_ports",
                "The number of ports allocated from a load balancer"
            ),
            &["plugin", "lb"],
        )
        .unwrap();
        let max_ports = IntGaugeVec::new(
            opts!(
                "fleetnetd_max_ports",
                "The number of allocatable ports of a load balancer"
            ),
            &["plugin", "lb"],
        )
        .unwrap();
        let network_ready = IntCounterVec::new(
            opts!(
                "fleetnetd_network_ready_total",
                "Total count of pod networks becoming ready"
            ),
            &["plugin"],
        )
        .unwrap();

        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            allocated_ports,
            max_ports,
            network_ready,
        }
    }
}

impl Metrics {
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.allocated_ports.clone()))?;
        registry.register(Box::new(self.max_ports.clone()))?;
        registry.register(Box::new(self.network_ready.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure<T: Resource<DynamicType = ()>, E: TraceableError>(
        &self,
        resource: &T,
        error: &E,
    ) {
        let obj = resource.object_ref(&());
        self.failures
            .with_label_values(&[
                &obj.kind.unwrap_or_default(),
                &obj.name.unwrap_or_default(),
                &error.metric_label(),
            ])
            .inc()
    }

    pub fn reconciliation<T: Resource<DynamicType = ()>>(&self, resource: &T) {
        let obj = resource.object_ref(&());
        self.reconciliations
            .with_label_values(&[&obj.kind.unwrap_or_default(), &obj.name.unwrap_or_default()])
            .inc()
    }

    pub fn measure(&self) -> ReconcileMeasurer {
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
        }
    }

    pub fn allocated_ports_set(&self, plugin: &str, lb: &str, val: i64) {
        self.allocated_ports
            .with_label_values(&[plugin, lb])
            .set(val)
    }

    pub fn max_ports_set(&self, plugin: &str, lb: &str, val: i64) {
        self.max_ports.with_label_values(&[plugin, lb]).set(val)
    }

    pub fn network_ready_inc(&self, plugin: &str) {
        self.network_ready.with_label_values(&[plugin]).inc()
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[]).observe(duration);
    }
}
