pub use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const SYNC_STATUS_LABEL: &str = "network.fleetnet.io/sync-status";
pub const SYNC_STATUS_PENDING: &str = "pending";
pub const SYNC_STATUS_DONE: &str = "done";
pub const TARGET_GROUP_POD_LABEL: &str = "network.fleetnet.io/pod";
pub const TARGET_GROUP_LB_ANNOTATION: &str = "network.fleetnet.io/lb-arn";
pub const TARGET_GROUP_PORT_ANNOTATION: &str = "network.fleetnet.io/lb-port";
pub const TARGET_GROUP_PROTOCOL_ANNOTATION: &str = "network.fleetnet.io/lb-protocol";

pub const ACK_CONDITION_TERMINAL: &str = "ACK.Terminal";
pub const ACK_CONDITION_RECOVERABLE: &str = "ACK.Recoverable";

// Subset of the ACK elbv2 controller's TargetGroup.
#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(
    group = "elbv2.services.k8s.aws",
    version = "v1alpha1",
    kind = "TargetGroup",
    namespaced
)]
#[kube(status = "TargetGroupStatus")]
#[kube(
    printcolumn = r#"{"name":"PORT", "type":"integer", "description":"target port", "jsonPath":".spec.port"}"#,
    printcolumn = r#"{"name":"PROTOCOL", "type":"string", "description":"target protocol", "jsonPath":".spec.protocol"}"#,
    printcolumn = r#"{"name":"SYNC", "type":"string", "description":"handshake status", "jsonPath":".metadata.labels.network\\.fleetnet\\.io/sync-status"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "description":"Date from created", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupSpec {
    pub name: String,
    pub protocol: String,
    pub port: i64,
    pub target_type: String,
    #[serde(rename = "vpcID")]
    pub vpc_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_interval_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_port: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_resource_metadata: Option<AckResourceMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<AckCondition>>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AckResourceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(rename = "ownerAccountID", skip_serializing_if = "Option::is_none")]
    pub owner_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AckCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
