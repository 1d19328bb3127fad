use std::collections::BTreeMap;

use async_trait::async_trait;
use fleetnetd_portpool::manager::Allocation;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::Client;

use crate::controller::error::Error;

use super::params::{NetworkConfig, ParamSchema};

pub const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";
pub const SERVICE_TYPE_CLUSTER_IP: &str = "ClusterIP";

/// Where a ready load balancer can be reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: String,
    pub end_point: Option<String>,
}

/// The cloud specific part of a network plugin.
///
/// The engine owns allocation, the Service lifecycle and status publication.
/// An adapter only describes how the backing objects look for its cloud and
/// when the load balancer counts as ready.
#[async_trait]
pub trait CloudAdapter: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn schema(&self) -> &ParamSchema;

    fn port_limit(&self) -> usize;

    fn service_type(&self) -> &'static str {
        SERVICE_TYPE_LOAD_BALANCER
    }

    fn candidate_lbs(&self, config: &NetworkConfig) -> Vec<String> {
        config.lb_ids.clone()
    }

    fn service_annotations(
        &self,
        config: &NetworkConfig,
        allocation: &Allocation,
    ) -> Result<BTreeMap<String, String>, Error>;

    // Creates resources chained to the backing Service.
    async fn ensure_chain(
        &self,
        _client: Client,
        _svc: &Service,
        _pod: &Pod,
        _allocation: &Allocation,
        _config: &NetworkConfig,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn endpoint(
        &self,
        _client: Client,
        svc: &Service,
        _allocation: &Allocation,
        _config: &NetworkConfig,
    ) -> Result<Option<Endpoint>, Error> {
        Ok(load_balancer_ingress(svc))
    }
}

pub fn load_balancer_ingress(svc: &Service) -> Option<Endpoint> {
    let ingress = svc
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())?;
    let ip = ingress.ip.clone().unwrap_or_default();
    let end_point = ingress.hostname.clone().filter(|h| !h.is_empty());
    if ip.is_empty() && end_point.is_none() {
        return None;
    }
    Some(Endpoint { ip, end_point })
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, ServiceStatus};
    use rstest::rstest;

    use super::*;

    fn svc_with_ingress(ingress: Option<Vec<LoadBalancerIngress>>) -> Service {
        Service {
            status: Some(ServiceStatus {
                load_balancer: Some(LoadBalancerStatus { ingress }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[rstest(
        ingress,
        expected,
        case(None, None),
        case(Some(vec![]), None),
        case(Some(vec![LoadBalancerIngress::default()]), None),
        case(
            Some(vec![LoadBalancerIngress { ip: Some("1.2.3.4".to_string()), ..Default::default() }]),
            Some(Endpoint { ip: "1.2.3.4".to_string(), end_point: None })
        ),
        case(
            Some(vec![LoadBalancerIngress { hostname: Some("lb.example.com".to_string()), ..Default::default() }]),
            Some(Endpoint { ip: String::new(), end_point: Some("lb.example.com".to_string()) })
        ),
    )]
    fn test_load_balancer_ingress(
        ingress: Option<Vec<LoadBalancerIngress>>,
        expected: Option<Endpoint>,
    ) {
        assert_eq!(load_balancer_ingress(&svc_with_ingress(ingress)), expected);
    }
}
