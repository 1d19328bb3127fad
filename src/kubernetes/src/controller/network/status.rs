use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

use crate::controller::error::Error;

pub const NETWORK_TYPE_ANNOTATION: &str = "game.kruise.io/network-type";
pub const NETWORK_CONF_ANNOTATION: &str = "game.kruise.io/network-conf";
pub const NETWORK_STATUS_ANNOTATION: &str = "game.kruise.io/network-status";
pub const NETWORK_DISABLED_ANNOTATION: &str = "game.kruise.io/network-disabled";

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum NetworkState {
    #[default]
    NotReady,
    Ready,
    Waiting,
}

impl std::fmt::Display for NetworkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkState::NotReady => write!(f, "NotReady"),
            NetworkState::Ready => write!(f, "Ready"),
            NetworkState::Waiting => write!(f, "Waiting"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct NetworkPort {
    pub name: String,
    pub port: i32,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAddress {
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_point: Option<String>,
    #[serde(default)]
    pub ports: Vec<NetworkPort>,
}

/// Durable network state of a pod, stored as a JSON annotation.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub current_network_state: NetworkState,
    pub desired_network_state: NetworkState,
    #[serde(default)]
    pub internal_addresses: Vec<NetworkAddress>,
    #[serde(default)]
    pub external_addresses: Vec<NetworkAddress>,
    #[serde(default)]
    pub network_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl NetworkStatus {
    pub fn new(network_type: &str) -> NetworkStatus {
        let now = Utc::now();
        NetworkStatus {
            current_network_state: NetworkState::NotReady,
            desired_network_state: NetworkState::Ready,
            network_type: network_type.to_string(),
            create_time: Some(now),
            last_transition_time: Some(now),
            ..Default::default()
        }
    }

    // Moves to the given state. Addresses are kept only while Ready.
    pub fn transition(
        mut self,
        state: NetworkState,
        internal: Vec<NetworkAddress>,
        external: Vec<NetworkAddress>,
    ) -> NetworkStatus {
        if self.current_network_state != state {
            self.last_transition_time = Some(Utc::now());
        }
        self.current_network_state = state;
        self.desired_network_state = NetworkState::Ready;
        if state == NetworkState::Ready {
            self.internal_addresses = internal;
            self.external_addresses = external;
        } else {
            self.internal_addresses = Vec::new();
            self.external_addresses = Vec::new();
        }
        self
    }
}

pub fn annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(|v| v.as_str())
}

pub fn network_type(pod: &Pod) -> Option<&str> {
    annotation(pod, NETWORK_TYPE_ANNOTATION)
}

pub fn is_network_disabled(pod: &Pod) -> bool {
    annotation(pod, NETWORK_DISABLED_ANNOTATION)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

// A missing or unreadable status is treated as absent.
pub fn get_network_status(pod: &Pod) -> Option<NetworkStatus> {
    let raw = annotation(pod, NETWORK_STATUS_ANNOTATION)?;
    match serde_json::from_str::<NetworkStatus>(raw) {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!(error=?e, "ignore unreadable network status");
            None
        }
    }
}

pub fn set_network_status(pod: &mut Pod, status: &NetworkStatus) -> Result<(), Error> {
    let value = serde_json::to_string(status).map_err(Error::Serialization)?;
    pod.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(NETWORK_STATUS_ANNOTATION.to_string(), value);
    Ok(())
}
