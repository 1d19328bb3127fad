use std::collections::BTreeMap;

use fleetnetd_portpool::manager::Allocation;
use serde::Serialize;

use crate::controller::{
    error::Error,
    network::{
        adapter::CloudAdapter,
        params::{NetworkConfig, ParamSchema},
    },
};

pub const PLUGIN_NAME: &str = "JdCloud-NLB";
pub const PORT_LIMIT: usize = 200;

pub const NLB_IDS_PARAM: &str = "NlbIds";
pub const IDLE_TIMEOUT_PARAM: &str = "IdleTimeout";

pub const LOAD_BALANCER_SPEC_ANNOTATION: &str =
    "service.beta.kubernetes.io/jdcloud-load-balancer-spec";

pub const DEFAULT_IDLE_TIMEOUT: i64 = 600;
const MIN_IDLE_TIMEOUT: i64 = 1;
const MAX_IDLE_TIMEOUT: i64 = 86400;

const SCHEMA: ParamSchema = ParamSchema {
    lb_id_key: NLB_IDS_PARAM,
    mandatory: &[],
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct LoadBalancerSpec {
    version: String,
    load_balancer_id: String,
    load_balancer_type: String,
    internal: bool,
    listeners: Vec<ListenerSpec>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
struct ListenerSpec {
    port: i32,
    protocol: String,
    connection_idle_time_seconds: i64,
}

/// JD Cloud NLB described by a single JSON annotation.
#[derive(Debug, Default, Clone)]
pub struct JdCloudNlb;

fn idle_timeout(config: &NetworkConfig) -> i64 {
    match config.extra_value(IDLE_TIMEOUT_PARAM) {
        Some(value) => match value.parse::<i64>() {
            Ok(v) if (MIN_IDLE_TIMEOUT..=MAX_IDLE_TIMEOUT).contains(&v) => v,
            _ => {
                tracing::warn!(value, "ignore invalid NLB idle timeout");
                DEFAULT_IDLE_TIMEOUT
            }
        },
        None => DEFAULT_IDLE_TIMEOUT,
    }
}

impl CloudAdapter for JdCloudNlb {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn schema(&self) -> &ParamSchema {
        &SCHEMA
    }

    fn port_limit(&self) -> usize {
        PORT_LIMIT
    }

    fn service_annotations(
        &self,
        config: &NetworkConfig,
        allocation: &Allocation,
    ) -> Result<BTreeMap<String, String>, Error> {
        let timeout = idle_timeout(config);
        let mut listeners = Vec::new();
        for (backend, port) in config.backends.iter().zip(allocation.ports.iter()) {
            for protocol in backend.protocol.service_protocols() {
                listeners.push(ListenerSpec {
                    port: *port,
                    protocol: protocol.to_string(),
                    connection_idle_time_seconds: timeout,
                });
            }
        }
        let spec = LoadBalancerSpec {
            version: "v1".to_string(),
            load_balancer_id: allocation.lb_id.clone(),
            load_balancer_type: "nlb".to_string(),
            internal: false,
            listeners,
        };
        let value = serde_json::to_string(&spec).map_err(Error::Serialization)?;
        Ok(BTreeMap::from([(
            LOAD_BALANCER_SPEC_ANNOTATION.to_string(),
            value,
        )]))
    }
}
