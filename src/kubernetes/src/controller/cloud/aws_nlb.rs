use std::collections::BTreeMap;

use async_trait::async_trait;
use fleetnetd_portpool::manager::Allocation;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::ObjectMeta,
    Api, Client, ResourceExt,
};
use sha2::{Digest, Sha256};

use crate::{
    controller::{
        error::Error,
        network::{
            adapter::{CloudAdapter, Endpoint, SERVICE_TYPE_CLUSTER_IP},
            handshake::Handshake,
            params::{Backend, NetworkConfig, ParamSchema, Protocol},
        },
    },
    crd::{
        listener::{Listener, ListenerAction, ListenerSpec},
        target_group::{
            TargetGroup, TargetGroupSpec, ACK_CONDITION_RECOVERABLE, ACK_CONDITION_TERMINAL,
            SYNC_STATUS_DONE, SYNC_STATUS_LABEL, SYNC_STATUS_PENDING, TARGET_GROUP_LB_ANNOTATION,
            TARGET_GROUP_POD_LABEL, TARGET_GROUP_PORT_ANNOTATION, TARGET_GROUP_PROTOCOL_ANNOTATION,
        },
        target_group_binding::{ServiceReference, TargetGroupBinding, TargetGroupBindingSpec},
    },
    util::{create_owner_reference, get_namespace},
};

pub const PLUGIN_NAME: &str = "AmazonWebServices-NLB";
pub const PORT_LIMIT: usize = 50;

pub const NLB_ARNS_PARAM: &str = "NlbARNs";
pub const NLB_VPC_ID_PARAM: &str = "NlbVPCId";
pub const NLB_HEALTH_CHECK_ENABLED_PARAM: &str = "NlbHealthCheckEnabled";
pub const NLB_HEALTH_CHECK_INTERVAL_PARAM: &str = "NlbHealthCheckIntervalSeconds";
pub const NLB_HEALTH_CHECK_PROTOCOL_PARAM: &str = "NlbHealthCheckProtocol";
pub const NLB_HEALTH_CHECK_PORT_PARAM: &str = "NlbHealthCheckPort";

pub const FIELD_MANAGER: &str = "fleetnetd";
pub const TARGET_GROUP_NAME_LIMIT: usize = 32;
pub const TARGET_TYPE_IP: &str = "ip";
pub const LISTENER_ACTION_FORWARD: &str = "forward";

const SCHEMA: ParamSchema = ParamSchema {
    lb_id_key: NLB_ARNS_PARAM,
    mandatory: &[NLB_VPC_ID_PARAM],
};

pub fn aws_protocol(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::TCP => "TCP",
        Protocol::UDP => "UDP",
        Protocol::TCPUDP => "TCP_UDP",
    }
}

// AWS accepts up to 32 alphanumerics and hyphens.
// Longer names keep a prefix of the pod name and a digest of the whole name.
pub fn target_group_name(pod: &str, lb_port: i32) -> String {
    let pod = pod.replace('.', "-");
    let name = format!("{pod}-{lb_port}");
    if name.len() <= TARGET_GROUP_NAME_LIMIT {
        return name;
    }
    let digest = format!("{:x}", Sha256::digest(pod.as_bytes()));
    let suffix = format!("-{}-{lb_port}", &digest[..8]);
    let prefix = pod[..TARGET_GROUP_NAME_LIMIT - suffix.len()].trim_end_matches('-');
    format!("{prefix}{suffix}")
}

// arn:aws:elasticloadbalancing:<region>:<account>:loadbalancer/net/<name>/<id>
pub fn endpoint_from_arn(arn: &str) -> Result<String, Error> {
    let parts = arn.splitn(6, ':').collect::<Vec<&str>>();
    if parts.len() != 6 || parts[0] != "arn" || parts[2] != "elasticloadbalancing" {
        return Err(Error::InvalidLoadBalancerId(arn.to_string()));
    }
    let region = parts[3];
    match parts[5].split('/').collect::<Vec<&str>>().as_slice() {
        ["loadbalancer", "net", name, id] if !region.is_empty() => {
            Ok(format!("{name}-{id}.elb.{region}.amazonaws.com"))
        }
        _ => Err(Error::InvalidLoadBalancerId(arn.to_string())),
    }
}

fn parse_optional<T: std::str::FromStr>(config: &NetworkConfig, key: &str) -> Option<T> {
    let value = config.extra_value(key)?;
    match value.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value, "ignore invalid health check parameter");
            None
        }
    }
}

fn target_group(
    svc: &Service,
    pod: &Pod,
    backend: &Backend,
    lb_port: i32,
    lb_arn: &str,
    config: &NetworkConfig,
) -> Result<TargetGroup, Error> {
    let vpc_id = config
        .extra_value(NLB_VPC_ID_PARAM)
        .ok_or_else(|| Error::MissingParameter(NLB_VPC_ID_PARAM.to_string()))?;
    let name = target_group_name(&pod.name_any(), lb_port);
    let protocol = aws_protocol(backend.protocol);

    Ok(TargetGroup {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(get_namespace(pod).map_err(Error::KubeLibrary)?),
            labels: Some(BTreeMap::from([
                (SYNC_STATUS_LABEL.to_string(), SYNC_STATUS_PENDING.to_string()),
                (TARGET_GROUP_POD_LABEL.to_string(), pod.name_any()),
            ])),
            annotations: Some(BTreeMap::from([
                (TARGET_GROUP_LB_ANNOTATION.to_string(), lb_arn.to_string()),
                (TARGET_GROUP_PORT_ANNOTATION.to_string(), lb_port.to_string()),
                (TARGET_GROUP_PROTOCOL_ANNOTATION.to_string(), protocol.to_string()),
            ])),
            owner_references: Some(vec![create_owner_reference(svc)]),
            ..Default::default()
        },
        spec: TargetGroupSpec {
            name,
            protocol: protocol.to_string(),
            port: backend.port as i64,
            target_type: TARGET_TYPE_IP.to_string(),
            vpc_id: vpc_id.to_string(),
            health_check_enabled: parse_optional(config, NLB_HEALTH_CHECK_ENABLED_PARAM),
            health_check_interval_seconds: parse_optional(config, NLB_HEALTH_CHECK_INTERVAL_PARAM),
            health_check_protocol: config
                .extra_value(NLB_HEALTH_CHECK_PROTOCOL_PARAM)
                .map(|p| p.to_uppercase()),
            health_check_port: config
                .extra_value(NLB_HEALTH_CHECK_PORT_PARAM)
                .map(|p| p.to_string()),
        },
        status: None,
    })
}

// Optional fields left unset may be filled in by ACK.
fn spec_matches(expected: &TargetGroupSpec, existing: &TargetGroupSpec) -> bool {
    fn unset_or_eq<T: PartialEq>(expected: &Option<T>, existing: &Option<T>) -> bool {
        expected.is_none() || expected == existing
    }
    expected.name == existing.name
        && expected.protocol == existing.protocol
        && expected.port == existing.port
        && expected.target_type == existing.target_type
        && expected.vpc_id == existing.vpc_id
        && unset_or_eq(&expected.health_check_enabled, &existing.health_check_enabled)
        && unset_or_eq(
            &expected.health_check_interval_seconds,
            &existing.health_check_interval_seconds,
        )
        && unset_or_eq(&expected.health_check_protocol, &existing.health_check_protocol)
        && unset_or_eq(&expected.health_check_port, &existing.health_check_port)
}

// Same binding target. Status and labels are left to the handshake.
fn is_same_target(expected: &TargetGroup, existing: &TargetGroup) -> bool {
    expected.name_any().eq(&existing.name_any())
        && expected.annotations().get(TARGET_GROUP_LB_ANNOTATION)
            == existing.annotations().get(TARGET_GROUP_LB_ANNOTATION)
        && expected.annotations().get(TARGET_GROUP_PROTOCOL_ANNOTATION)
            == existing.annotations().get(TARGET_GROUP_PROTOCOL_ANNOTATION)
        && spec_matches(&expected.spec, &existing.spec)
}

async fn list_target_groups(
    client: Client,
    namespace: &str,
    pod: &str,
) -> Result<(Api<TargetGroup>, Vec<TargetGroup>), Error> {
    let api = Api::<TargetGroup>::namespaced(client, namespace);
    let lp = ListParams::default().labels(&format!("{TARGET_GROUP_POD_LABEL}={pod}"));
    let list = api.list(&lp).await.map_err(Error::Kube)?;
    Ok((api, list.items))
}

/// AWS NLB bound through ACK TargetGroups and TargetGroupBindings.
#[derive(Debug, Default, Clone)]
pub struct AwsNlb;

#[async_trait]
impl CloudAdapter for AwsNlb {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn schema(&self) -> &ParamSchema {
        &SCHEMA
    }

    fn port_limit(&self) -> usize {
        PORT_LIMIT
    }

    fn service_type(&self) -> &'static str {
        SERVICE_TYPE_CLUSTER_IP
    }

    fn service_annotations(
        &self,
        _config: &NetworkConfig,
        _allocation: &Allocation,
    ) -> Result<BTreeMap<String, String>, Error> {
        Ok(BTreeMap::new())
    }

    #[tracing::instrument(skip_all, fields(pod = pod.name_any()))]
    async fn ensure_chain(
        &self,
        client: Client,
        svc: &Service,
        pod: &Pod,
        allocation: &Allocation,
        config: &NetworkConfig,
    ) -> Result<(), Error> {
        let ns = get_namespace(pod).map_err(Error::KubeLibrary)?;
        let mut expected = Vec::new();
        for (backend, lb_port) in config.backends.iter().zip(allocation.ports.iter()) {
            expected.push(target_group(
                svc,
                pod,
                backend,
                *lb_port,
                &allocation.lb_id,
                config,
            )?);
        }

        let (api, existing) = list_target_groups(client, &ns, &pod.name_any()).await?;

        for tg in existing.iter() {
            if expected.iter().any(|e| is_same_target(e, tg)) {
                continue;
            }
            if tg.metadata.deletion_timestamp.is_some() {
                tracing::debug!(name = tg.name_any(), "stale TargetGroup is being deleted");
                continue;
            }
            tracing::info!(name = tg.name_any(), "delete stale TargetGroup");
            api.delete(&tg.name_any(), &DeleteParams::default())
                .await
                .map_err(Error::Kube)?;
        }

        // Existing ones are never reset to pending.
        for tg in expected.iter() {
            if existing.iter().any(|e| is_same_target(tg, e)) {
                continue;
            }
            // Created by a later pass once the stale one with the same name is gone.
            if existing.iter().any(|e| e.name_any().eq(&tg.name_any())) {
                tracing::info!(name = tg.name_any(), "wait for stale TargetGroup to be deleted");
                continue;
            }
            tracing::info!(name = tg.name_any(), "create TargetGroup");
            api.create(&PostParams::default(), tg)
                .await
                .map_err(Error::Kube)?;
        }
        Ok(())
    }

    async fn endpoint(
        &self,
        client: Client,
        svc: &Service,
        allocation: &Allocation,
        _config: &NetworkConfig,
    ) -> Result<Option<Endpoint>, Error> {
        let ns = get_namespace(svc).map_err(Error::KubeLibrary)?;
        let (_, existing) = list_target_groups(client, &ns, &svc.name_any()).await?;

        let bound = allocation.ports.iter().all(|port| {
            let name = target_group_name(&svc.name_any(), *port);
            existing.iter().any(|tg| {
                tg.name_any().eq(&name)
                    && tg
                        .labels()
                        .get(SYNC_STATUS_LABEL)
                        .map(|v| v.eq(SYNC_STATUS_DONE))
                        .unwrap_or(false)
            })
        });
        if !bound {
            return Ok(None);
        }
        Ok(Some(Endpoint {
            ip: String::new(),
            end_point: Some(endpoint_from_arn(&allocation.lb_id)?),
        }))
    }
}

/// Binds a TargetGroup once ACK reports its ARN.
#[derive(Debug, Default, Clone)]
pub struct TargetGroupHandshake;

#[async_trait]
impl Handshake for TargetGroupHandshake {
    type Intermediate = TargetGroup;

    fn identifier(&self, tg: &TargetGroup) -> Option<String> {
        tg.status
            .as_ref()
            .and_then(|s| s.ack_resource_metadata.as_ref())
            .and_then(|m| m.arn.clone())
            .filter(|arn| !arn.is_empty())
    }

    fn failure(&self, tg: &TargetGroup) -> Option<String> {
        tg.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conditions| {
                conditions.iter().find(|c| {
                    (c.type_.eq(ACK_CONDITION_TERMINAL) || c.type_.eq(ACK_CONDITION_RECOVERABLE))
                        && c.status.eq("True")
                })
            })
            .map(|c| format!("{}: {}", c.type_, c.message.clone().unwrap_or_default()))
    }

    async fn complete(
        &self,
        client: Client,
        tg: &TargetGroup,
        identifier: &str,
    ) -> Result<(), Error> {
        let ns = get_namespace(tg).map_err(Error::KubeLibrary)?;
        let name = tg.name_any();
        let incomplete = |what: &str| Error::IncompleteResource(format!("{name} has no {what}"));

        let lb_arn = tg
            .annotations()
            .get(TARGET_GROUP_LB_ANNOTATION)
            .cloned()
            .ok_or_else(|| incomplete("load balancer"))?;
        let lb_port = tg
            .annotations()
            .get(TARGET_GROUP_PORT_ANNOTATION)
            .and_then(|p| p.parse::<i32>().ok())
            .ok_or_else(|| incomplete("load balancer port"))?;
        let protocol = tg
            .annotations()
            .get(TARGET_GROUP_PROTOCOL_ANNOTATION)
            .cloned()
            .unwrap_or_else(|| tg.spec.protocol.clone());
        let pod = tg
            .labels()
            .get(TARGET_GROUP_POD_LABEL)
            .cloned()
            .ok_or_else(|| incomplete("pod"))?;

        let metadata = ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(ns.clone()),
            owner_references: Some(vec![create_owner_reference(tg)]),
            ..Default::default()
        };
        let listener = Listener {
            metadata: metadata.clone(),
            spec: ListenerSpec {
                load_balancer_arn: lb_arn,
                port: lb_port as i64,
                protocol,
                default_actions: vec![ListenerAction {
                    type_: LISTENER_ACTION_FORWARD.to_string(),
                    target_group_arn: identifier.to_string(),
                }],
            },
        };
        let binding = TargetGroupBinding {
            metadata,
            spec: TargetGroupBindingSpec {
                target_group_arn: identifier.to_string(),
                target_type: TARGET_TYPE_IP.to_string(),
                service_ref: ServiceReference {
                    name: pod,
                    port: lb_port,
                },
            },
        };

        let params = PatchParams::apply(FIELD_MANAGER).force();
        Api::<Listener>::namespaced(client.clone(), &ns)
            .patch(&name, &params, &Patch::Apply(&listener))
            .await
            .map_err(Error::Kube)?;
        Api::<TargetGroupBinding>::namespaced(client, &ns)
            .patch(&name, &params, &Patch::Apply(&binding))
            .await
            .map_err(Error::Kube)?;

        tracing::info!(name, lb_port, "applied Listener and TargetGroupBinding");
        Ok(())
    }
}
