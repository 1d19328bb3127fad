use std::collections::BTreeMap;

use fleetnetd_portpool::manager::Allocation;
use k8s_openapi::{
    api::core::v1::{Pod, Service, ServicePort, ServiceSpec},
    apimachinery::pkg::{apis::meta::v1::OwnerReference, util::intstr::IntOrString},
};
use kube::{core::ObjectMeta, ResourceExt};

use crate::{controller::error::Error, util::get_namespace};

use super::{
    params::NetworkConfig,
    status::{NetworkAddress, NetworkPort},
};

pub const PLUGIN_LABEL: &str = "network.fleetnet.io/plugin";
pub const CONFIG_HASH_ANNOTATION: &str = "network.fleetnet.io/config-hash";
pub const LB_ID_ANNOTATION: &str = "network.fleetnet.io/lb-id";
pub const OWNER_KEY_ANNOTATION: &str = "network.fleetnet.io/owner-key";
pub const POD_NAME_SELECTOR: &str = "statefulset.kubernetes.io/pod-name";
pub const DISABLED_POD_NAME_SELECTOR: &str = "network.fleetnet.io/disabled-pod-name";

/// Everything needed to render the backing Service of one pod.
pub struct ServiceTemplate<'a> {
    pub plugin: &'a str,
    pub service_type: &'a str,
    pub config: &'a NetworkConfig,
    pub config_hash: &'a str,
    pub allocation: &'a Allocation,
    pub owner: OwnerReference,
    pub annotations: BTreeMap<String, String>,
    pub disabled: bool,
}

impl<'a> ServiceTemplate<'a> {
    pub fn build(self, pod: &Pod) -> Result<Service, Error> {
        let namespace = get_namespace(pod).map_err(Error::KubeLibrary)?;
        let mut annotations = self.annotations;
        annotations.insert(
            CONFIG_HASH_ANNOTATION.to_string(),
            self.config_hash.to_string(),
        );
        annotations.insert(
            LB_ID_ANNOTATION.to_string(),
            self.allocation.lb_id.clone(),
        );
        annotations.insert(
            OWNER_KEY_ANNOTATION.to_string(),
            self.allocation.owner_key.clone(),
        );

        Ok(Service {
            metadata: ObjectMeta {
                name: Some(pod.name_any()),
                namespace: Some(namespace),
                labels: Some(BTreeMap::from([(
                    PLUGIN_LABEL.to_string(),
                    self.plugin.to_string(),
                )])),
                annotations: Some(annotations),
                owner_references: Some(vec![self.owner]),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some(self.service_type.to_string()),
                selector: Some(selector(&pod.name_any(), self.disabled)),
                ports: Some(service_ports(self.config, self.allocation)?),
                ..Default::default()
            }),
            status: None,
        })
    }
}

fn selector(pod_name: &str, disabled: bool) -> BTreeMap<String, String> {
    let key = if disabled {
        DISABLED_POD_NAME_SELECTOR
    } else {
        POD_NAME_SELECTOR
    };
    BTreeMap::from([(key.to_string(), pod_name.to_string())])
}

// One ServicePort per backend and protocol. TCPUDP shares one LB port.
pub fn service_ports(
    config: &NetworkConfig,
    allocation: &Allocation,
) -> Result<Vec<ServicePort>, Error> {
    if config.backends.len() != allocation.ports.len() {
        return Err(Error::InvalidService(format!(
            "{} backends do not match {} allocated ports",
            config.backends.len(),
            allocation.ports.len()
        )));
    }
    let mut ports = Vec::new();
    for (backend, lb_port) in config.backends.iter().zip(allocation.ports.iter()) {
        for protocol in backend.protocol.service_protocols() {
            ports.push(ServicePort {
                name: Some(format!("{}-{}", protocol.to_lowercase(), backend.port)),
                port: *lb_port,
                target_port: Some(IntOrString::Int(backend.port)),
                protocol: Some(protocol.to_string()),
                ..Default::default()
            });
        }
    }
    Ok(ports)
}

pub fn config_hash(svc: &Service) -> Option<&str> {
    svc.annotations()
        .get(CONFIG_HASH_ANNOTATION)
        .map(|s| s.as_str())
}

pub fn is_disabled(svc: &Service) -> bool {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .map(|s| s.contains_key(DISABLED_POD_NAME_SELECTOR))
        .unwrap_or(false)
}

// Same Service routing or not routing traffic to its pod.
pub fn with_disabled(svc: &Service, disabled: bool) -> Service {
    let mut new_svc = svc.clone();
    if let Some(spec) = new_svc.spec.as_mut() {
        spec.selector = Some(selector(&svc.name_any(), disabled));
    }
    new_svc
}

/// The allocation recorded on an existing backing Service.
pub fn recorded_allocation(svc: &Service) -> Result<Allocation, Error> {
    let annotations = svc.annotations();
    let lb_id = annotations
        .get(LB_ID_ANNOTATION)
        .ok_or_else(|| Error::InvalidService(format!("{} has no lb id", svc.name_any())))?;
    let owner_key = match annotations.get(OWNER_KEY_ANNOTATION) {
        Some(key) => key.clone(),
        None => match svc.namespace() {
            Some(ns) => format!("{ns}/{}", svc.name_any()),
            None => svc.name_any(),
        },
    };
    let mut ports: Vec<i32> = Vec::new();
    for p in svc
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .iter()
        .flat_map(|ports| ports.iter())
    {
        if !ports.contains(&p.port) {
            ports.push(p.port);
        }
    }
    if ports.is_empty() {
        return Err(Error::InvalidService(format!(
            "{} has no ports",
            svc.name_any()
        )));
    }
    Ok(Allocation {
        owner_key,
        lb_id: lb_id.clone(),
        ports,
    })
}

/// Addresses published once the load balancer is ready.
/// Internal ones point at the pod, external ones at the load balancer.
pub fn addresses(
    config: &NetworkConfig,
    allocation: &Allocation,
    pod_ip: &str,
    lb_ip: &str,
    lb_endpoint: Option<&str>,
) -> (Vec<NetworkAddress>, Vec<NetworkAddress>) {
    let mut internal = Vec::new();
    let mut external = Vec::new();
    for (backend, lb_port) in config.backends.iter().zip(allocation.ports.iter()) {
        let name = backend.port.to_string();
        let protocol = backend.protocol.to_string();
        internal.push(NetworkAddress {
            ip: pod_ip.to_string(),
            end_point: None,
            ports: vec![NetworkPort {
                name: name.clone(),
                port: backend.port,
                protocol: protocol.clone(),
            }],
        });
        external.push(NetworkAddress {
            ip: lb_ip.to_string(),
            end_point: lb_endpoint.map(|e| e.to_string()),
            ports: vec![NetworkPort {
                name,
                port: *lb_port,
                protocol,
            }],
        });
    }
    (internal, external)
}

#[cfg(test)]
mod tests {
    use crate::controller::network::params::{Backend, Protocol};

    use super::*;

    fn config() -> NetworkConfig {
        NetworkConfig {
            lb_ids: vec!["lb-1".to_string()],
            backends: vec![
                Backend {
                    port: 7777,
                    protocol: Protocol::TCPUDP,
                },
                Backend {
                    port: 8080,
                    protocol: Protocol::TCP,
                },
            ],
            fixed: false,
            extra: BTreeMap::new(),
        }
    }

    fn allocation() -> Allocation {
        Allocation {
            owner_key: "default/gs-0".to_string(),
            lb_id: "lb-1".to_string(),
            ports: vec![500, 501],
        }
    }

    fn pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("gs-0".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("pod-uid".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn build(disabled: bool) -> Service {
        ServiceTemplate {
            plugin: "Tencent-CLB",
            service_type: "LoadBalancer",
            config: &config(),
            config_hash: "hash",
            allocation: &allocation(),
            owner: crate::util::create_owner_reference(&pod()),
            annotations: BTreeMap::from([(
                "service.kubernetes.io/tke-existed-lbid".to_string(),
                "lb-1".to_string(),
            )]),
            disabled,
        }
        .build(&pod())
        .unwrap()
    }

    #[test]
    fn work_build_service() {
        let svc = build(false);
        assert_eq!(svc.name_any(), "gs-0");
        assert_eq!(svc.labels().get(PLUGIN_LABEL).unwrap(), "Tencent-CLB");
        assert_eq!(config_hash(&svc), Some("hash"));
        assert_eq!(svc.annotations().get(LB_ID_ANNOTATION).unwrap(), "lb-1");
        assert_eq!(
            svc.annotations()
                .get("service.kubernetes.io/tke-existed-lbid")
                .unwrap(),
            "lb-1"
        );
        assert_eq!(svc.owner_references()[0].kind, "Pod");

        let ports = svc.spec.as_ref().unwrap().ports.clone().unwrap();
        let rendered = ports
            .iter()
            .map(|p| (p.name.clone().unwrap(), p.port, p.protocol.clone().unwrap()))
            .collect::<Vec<(String, i32, String)>>();
        assert_eq!(
            rendered,
            vec![
                ("tcp-7777".to_string(), 500, "TCP".to_string()),
                ("udp-7777".to_string(), 500, "UDP".to_string()),
                ("tcp-8080".to_string(), 501, "TCP".to_string()),
            ]
        );
        assert!(!is_disabled(&svc));
    }

    #[test]
    fn work_disable_and_enable_service() {
        let svc = build(false);
        let disabled = with_disabled(&svc, true);
        assert!(is_disabled(&disabled));
        let selector = disabled.spec.as_ref().unwrap().selector.clone().unwrap();
        assert_eq!(selector.get(DISABLED_POD_NAME_SELECTOR).unwrap(), "gs-0");
        assert!(!selector.contains_key(POD_NAME_SELECTOR));

        let enabled = with_disabled(&disabled, false);
        assert!(!is_disabled(&enabled));
        assert_eq!(build(true).spec, disabled.spec);
    }

    #[test]
    fn work_recorded_allocation() {
        let svc = build(false);
        assert_eq!(recorded_allocation(&svc).unwrap(), allocation());
    }

    #[test]
    fn fail_recorded_allocation_without_lb_id() {
        let mut svc = build(false);
        svc.annotations_mut().remove(LB_ID_ANNOTATION);
        assert!(matches!(
            recorded_allocation(&svc),
            Err(Error::InvalidService(_))
        ));
    }

    #[test]
    fn fail_service_ports_mismatch() {
        let mut a = allocation();
        a.ports.pop();
        assert!(service_ports(&config(), &a).is_err());
    }

    #[test]
    fn work_addresses() {
        let (internal, external) =
            addresses(&config(), &allocation(), "10.0.0.5", "1.2.3.4", None);
        assert_eq!(internal.len(), 2);
        assert_eq!(internal[0].ip, "10.0.0.5");
        assert_eq!(internal[0].ports[0].port, 7777);
        assert_eq!(internal[0].ports[0].protocol, "TCPUDP");
        assert_eq!(external[1].ip, "1.2.3.4");
        assert_eq!(external[1].ports[0].port, 501);
        assert_eq!(external[1].ports[0].name, "8080");
    }
}
