use fleetnetd_trace::error::TraceableError;
use kube::core::admission::SerializePatchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("std::io::Error")]
    StdIo(#[from] std::io::Error),

    #[error("failed to get lock")]
    FailedToGetLock,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("SerializationError: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("SerializePatchError: {0}")]
    SerializePatch(#[source] SerializePatchError),

    #[error("Kube Error: {0}")]
    Kube(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("Kube Library Error: {0}")]
    KubeLibrary(#[source] crate::error::Error),

    #[error("Port allocation Error: {0}")]
    PortPool(#[source] fleetnetd_portpool::error::Error),

    #[error("Trace Error: {0}")]
    Trace(#[source] fleetnetd_trace::error::Error),

    #[error("Prometheus Error: {0}")]
    Prometheus(#[source] prometheus::Error),

    #[error("TLS Error: {0}")]
    Tls(String),

    #[error("Missing network parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid network configuration annotation: {0}")]
    InvalidNetworkConf(String),

    #[error("Network plugin is not found: {0}")]
    PluginNotFound(String),

    #[error("Owner workload is not found for {0}")]
    OwnerNotFound(String),

    #[error("Invalid Service: {0}")]
    InvalidService(String),

    #[error("Invalid load balancer id: {0}")]
    InvalidLoadBalancerId(String),

    #[error("Intermediate resource is incomplete: {0}")]
    IncompleteResource(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load: {0}")]
    FailedToLoad(String),
    #[error("no network plugin is enabled")]
    NoPlugin,
    #[error("invalid port range for {0}: {1}")]
    InvalidPortRange(String, String),
}

impl Error {
    pub fn is_insufficient_ports(&self) -> bool {
        matches!(
            self,
            Error::PortPool(fleetnetd_portpool::error::Error::InsufficientPorts { .. })
        )
    }
}

impl TraceableError for &Error {
    fn metric_label(&self) -> String {
        <Error as TraceableError>::metric_label(self)
    }
}

impl TraceableError for Error {
    fn metric_label(&self) -> String {
        let s = format!("{self:?}");
        s.split(|c: char| !c.is_alphanumeric())
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }
}
