use std::{collections::BTreeMap, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::controller::error::Error;

pub const PORT_PROTOCOLS_PARAM: &str = "PortProtocols";
pub const FIXED_PARAM: &str = "Fixed";

/// One raw `{name, value}` entry of the network configuration annotation.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub struct NetworkConfParam {
    pub name: String,
    pub value: String,
}

impl NetworkConfParam {
    pub fn new(name: &str, value: &str) -> NetworkConfParam {
        NetworkConfParam {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    #[default]
    TCP,
    UDP,
    TCPUDP,
}

impl Protocol {
    // Kubernetes protocols a backend is exposed with.
    pub fn service_protocols(&self) -> Vec<&'static str> {
        match self {
            Protocol::TCP => vec!["TCP"],
            Protocol::UDP => vec!["UDP"],
            Protocol::TCPUDP => vec!["TCP", "UDP"],
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::TCP => write!(f, "TCP"),
            Protocol::UDP => write!(f, "UDP"),
            Protocol::TCPUDP => write!(f, "TCPUDP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TCP" => Ok(Protocol::TCP),
            "UDP" => Ok(Protocol::UDP),
            "TCPUDP" => Ok(Protocol::TCPUDP),
            _ => Err(Error::InvalidNetworkConf(format!("unknown protocol {s}"))),
        }
    }
}

/// A container port exposed through the load balancer.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct Backend {
    pub port: i32,
    pub protocol: Protocol,
}

/// Which parameter keys a cloud adapter requires.
#[derive(Debug, Clone, Copy)]
pub struct ParamSchema {
    pub lb_id_key: &'static str,
    pub mandatory: &'static [&'static str],
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub lb_ids: Vec<String>,
    pub backends: Vec<Backend>,
    pub fixed: bool,
    pub extra: BTreeMap<String, String>,
}

impl NetworkConfig {
    pub fn parse(raw: &[NetworkConfParam], schema: &ParamSchema) -> Result<NetworkConfig, Error> {
        let mut config = NetworkConfig::default();
        for param in raw.iter() {
            let name = param.name.as_str();
            if name.eq(schema.lb_id_key) {
                config.lb_ids = parse_lb_ids(&param.value);
            } else if name.eq(PORT_PROTOCOLS_PARAM) {
                config.backends = parse_port_protocols(&param.value);
            } else if name.eq(FIXED_PARAM) {
                match param.value.trim().parse::<bool>() {
                    Ok(fixed) => config.fixed = fixed,
                    Err(_) => tracing::warn!(
                        name,
                        value = param.value,
                        "ignore invalid boolean network parameter"
                    ),
                }
            } else {
                config
                    .extra
                    .insert(param.name.clone(), param.value.clone());
            }
        }

        if config.lb_ids.is_empty() {
            return Err(Error::MissingParameter(schema.lb_id_key.to_string()));
        }
        if config.backends.is_empty() {
            return Err(Error::MissingParameter(PORT_PROTOCOLS_PARAM.to_string()));
        }
        for key in schema.mandatory.iter() {
            match config.extra.get(*key) {
                Some(v) if !v.trim().is_empty() => {}
                _ => return Err(Error::MissingParameter(key.to_string())),
            }
        }
        Ok(config)
    }

    // Digest over the canonical JSON form. Object keys are sorted.
    pub fn hash(&self) -> Result<String, Error> {
        let value = serde_json::to_value(self).map_err(Error::Serialization)?;
        let canonical = serde_json::to_string(&value).map_err(Error::Serialization)?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn extra_value(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

fn parse_lb_ids(value: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in value.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !ids.iter().any(|i| i.eq(id)) {
            ids.push(id.to_string());
        }
    }
    ids
}

// "81/UDP,82,83/TCP". A missing protocol means TCP.
fn parse_port_protocols(value: &str) -> Vec<Backend> {
    let mut backends = Vec::new();
    for item in value.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let (port, protocol) = match item.split_once('/') {
            Some((port, protocol)) => (port, Some(protocol)),
            None => (item, None),
        };
        let port = match port.trim().parse::<i32>() {
            Ok(p) if (1..=65535).contains(&p) => p,
            _ => {
                tracing::warn!(item, "ignore invalid port in network parameter");
                continue;
            }
        };
        let protocol = match protocol.map(Protocol::from_str) {
            None => Protocol::TCP,
            Some(Ok(p)) => p,
            Some(Err(_)) => {
                tracing::warn!(item, "ignore invalid protocol in network parameter");
                continue;
            }
        };
        backends.push(Backend { port, protocol });
    }
    backends
}

pub fn parse_conf_annotation(value: &str) -> Result<Vec<NetworkConfParam>, Error> {
    serde_json::from_str(value).map_err(|e| Error::InvalidNetworkConf(e.to_string()))
}
