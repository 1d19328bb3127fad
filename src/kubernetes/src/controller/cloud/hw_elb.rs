use std::collections::BTreeMap;

use fleetnetd_portpool::manager::Allocation;

use crate::controller::{
    error::Error,
    network::{
        adapter::CloudAdapter,
        params::{NetworkConfig, ParamSchema},
    },
};

pub const PLUGIN_NAME: &str = "HwCloud-ELB";
pub const PORT_LIMIT: usize = 200;

pub const ELB_IDS_PARAM: &str = "ElbIds";
pub const ELB_CLASS_PARAM: &str = "ElbClass";
pub const ELB_HEALTH_CHECK_FLAG_PARAM: &str = "ElbHealthCheckFlag";
pub const ELB_HEALTH_CHECK_OPTION_PARAM: &str = "ElbHealthCheckOption";

pub const ELB_ANNOTATION_PREFIX: &str = "kubernetes.io/elb.";
pub const ELB_ID_ANNOTATION: &str = "kubernetes.io/elb.id";
pub const ELB_CLASS_ANNOTATION: &str = "kubernetes.io/elb.class";
pub const ELB_HEALTH_CHECK_FLAG_ANNOTATION: &str = "kubernetes.io/elb.health-check-flag";
pub const ELB_HEALTH_CHECK_OPTION_ANNOTATION: &str = "kubernetes.io/elb.health-check-option";

pub const DEFAULT_ELB_CLASS: &str = "performance";
const ELB_CLASSES: [&str; 3] = ["performance", "dedicated", "union"];

const SCHEMA: ParamSchema = ParamSchema {
    lb_id_key: ELB_IDS_PARAM,
    mandatory: &[],
};

/// Huawei Cloud ELB attached through Service annotations.
#[derive(Debug, Default, Clone)]
pub struct HwElb;

impl CloudAdapter for HwElb {
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
        let mut annotations = BTreeMap::new();

        // Raw ELB annotations pass through untouched.
        for (key, value) in config.extra.iter() {
            if key.starts_with(ELB_ANNOTATION_PREFIX) {
                annotations.insert(key.clone(), value.clone());
            }
        }

        let class = match config.extra_value(ELB_CLASS_PARAM) {
            Some(class) if ELB_CLASSES.contains(&class) => class,
            Some(class) => {
                tracing::warn!(class, "ignore unknown ELB class");
                DEFAULT_ELB_CLASS
            }
            None => DEFAULT_ELB_CLASS,
        };
        annotations.insert(ELB_CLASS_ANNOTATION.to_string(), class.to_string());

        match config.extra_value(ELB_HEALTH_CHECK_FLAG_PARAM) {
            Some(flag) if flag.eq("on") || flag.eq("off") => {
                annotations.insert(
                    ELB_HEALTH_CHECK_FLAG_ANNOTATION.to_string(),
                    flag.to_string(),
                );
            }
            Some(flag) => tracing::warn!(flag, "ignore invalid ELB health check flag"),
            None => {}
        }

        if let Some(option) = config.extra_value(ELB_HEALTH_CHECK_OPTION_PARAM) {
            match serde_json::from_str::<serde_json::Value>(option) {
                Ok(serde_json::Value::Object(_)) => {
                    annotations.insert(
                        ELB_HEALTH_CHECK_OPTION_ANNOTATION.to_string(),
                        option.to_string(),
                    );
                }
                _ => tracing::warn!(option, "ignore invalid ELB health check option"),
            }
        }

        annotations.insert(ELB_ID_ANNOTATION.to_string(), allocation.lb_id.clone());
        Ok(annotations)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::controller::network::params::NetworkConfParam;

    use super::*;

    fn annotations(extra: &[(&str, &str)]) -> BTreeMap<String, String> {
        let mut raw = vec![
            NetworkConfParam::new("ElbIds", "elb-1"),
            NetworkConfParam::new("PortProtocols", "80"),
        ];
        raw.extend(extra.iter().map(|(k, v)| NetworkConfParam::new(k, v)));
        let config = NetworkConfig::parse(&raw, HwElb.schema()).unwrap();
        let allocation = Allocation {
            owner_key: "default/gs-0".to_string(),
            lb_id: "elb-1".to_string(),
            ports: vec![1000],
        };
        HwElb.service_annotations(&config, &allocation).unwrap()
    }

    #[test]
    fn work_hw_service_annotations_default() {
        let a = annotations(&[]);
        assert_eq!(a.get(ELB_ID_ANNOTATION).unwrap(), "elb-1");
        assert_eq!(a.get(ELB_CLASS_ANNOTATION).unwrap(), DEFAULT_ELB_CLASS);
        assert!(a.get(ELB_HEALTH_CHECK_FLAG_ANNOTATION).is_none());
    }

    #[rstest(
        extra,
        key,
        expected,
        case(vec![("ElbClass", "dedicated")], ELB_CLASS_ANNOTATION, Some("dedicated")),
        case(vec![("ElbClass", "gold")], ELB_CLASS_ANNOTATION, Some("performance")),
        case(vec![("ElbHealthCheckFlag", "on")], ELB_HEALTH_CHECK_FLAG_ANNOTATION, Some("on")),
        case(vec![("ElbHealthCheckFlag", "yes")], ELB_HEALTH_CHECK_FLAG_ANNOTATION, None),
        case(vec![("ElbHealthCheckOption", r#"{"delay":"3"}"#)], ELB_HEALTH_CHECK_OPTION_ANNOTATION, Some(r#"{"delay":"3"}"#)),
        case(vec![("ElbHealthCheckOption", "3")], ELB_HEALTH_CHECK_OPTION_ANNOTATION, None),
        case(vec![("kubernetes.io/elb.lb-algorithm", "ROUND_ROBIN")], "kubernetes.io/elb.lb-algorithm", Some("ROUND_ROBIN")),
        case(vec![("kubernetes.io/elb.id", "elb-other")], ELB_ID_ANNOTATION, Some("elb-1")),
    )]
    fn test_hw_service_annotations(extra: Vec<(&str, &str)>, key: &str, expected: Option<&str>) {
        let a = annotations(&extra);
        assert_eq!(a.get(key).map(|v| v.as_str()), expected);
    }
}
