use std::collections::BTreeMap;

use fleetnetd_portpool::manager::Allocation;

use crate::controller::{
    error::Error,
    network::{
        adapter::CloudAdapter,
        params::{NetworkConfig, ParamSchema},
    },
};

pub const PLUGIN_NAME: &str = "Tencent-CLB";
pub const PORT_LIMIT: usize = 50;

pub const CLB_IDS_PARAM: &str = "ClbIds";

pub const EXISTED_LB_ID_ANNOTATION: &str = "service.kubernetes.io/tke-existed-lbid";
pub const SPECIFY_PROTOCOL_ANNOTATION: &str = "service.cloud.tencent.com/specify-protocol";

const SCHEMA: ParamSchema = ParamSchema {
    lb_id_key: CLB_IDS_PARAM,
    mandatory: &[],
};

/// Tencent Cloud CLB bound through an existing load balancer.
#[derive(Debug, Default, Clone)]
pub struct TencentClb;

impl CloudAdapter for TencentClb {
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
        // {"<lb port>": {"protocol": ["TCP", "UDP"]}}
        let mut protocols = serde_json::Map::new();
        for (backend, port) in config.backends.iter().zip(allocation.ports.iter()) {
            protocols.insert(
                port.to_string(),
                serde_json::json!({ "protocol": backend.protocol.service_protocols() }),
            );
        }
        let specify = serde_json::to_string(&protocols).map_err(Error::Serialization)?;

        Ok(BTreeMap::from([
            (
                EXISTED_LB_ID_ANNOTATION.to_string(),
                allocation.lb_id.clone(),
            ),
            (SPECIFY_PROTOCOL_ANNOTATION.to_string(), specify),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use crate::controller::network::params::NetworkConfParam;

    use super::*;

    #[test]
    fn work_tencent_service_annotations() {
        let raw = vec![
            NetworkConfParam::new("ClbIds", "lb-a,lb-b"),
            NetworkConfParam::new("PortProtocols", "7777/TCPUDP,8080/UDP"),
        ];
        let adapter = TencentClb;
        let config = NetworkConfig::parse(&raw, adapter.schema()).unwrap();
        assert_eq!(adapter.candidate_lbs(&config), vec!["lb-a", "lb-b"]);

        let allocation = Allocation {
            owner_key: "default/gs-0".to_string(),
            lb_id: "lb-b".to_string(),
            ports: vec![700, 701],
        };
        let annotations = adapter.service_annotations(&config, &allocation).unwrap();
        assert_eq!(annotations.get(EXISTED_LB_ID_ANNOTATION).unwrap(), "lb-b");
        let specify: serde_json::Value =
            serde_json::from_str(annotations.get(SPECIFY_PROTOCOL_ANNOTATION).unwrap()).unwrap();
        assert_eq!(
            specify,
            serde_json::json!({
                "700": {"protocol": ["TCP", "UDP"]},
                "701": {"protocol": ["UDP"]},
            })
        );
        assert_eq!(adapter.service_type(), "LoadBalancer");
    }
}
