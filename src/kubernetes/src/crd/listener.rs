pub use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Subset of the ACK elbv2 controller's Listener.
#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(
    group = "elbv2.services.k8s.aws",
    version = "v1alpha1",
    kind = "Listener",
    namespaced
)]
#[kube(
    printcolumn = r#"{"name":"PORT", "type":"integer", "description":"listener port", "jsonPath":".spec.port"}"#,
    printcolumn = r#"{"name":"PROTOCOL", "type":"string", "description":"listener protocol", "jsonPath":".spec.protocol"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "description":"Date from created", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    #[serde(rename = "loadBalancerARN")]
    pub load_balancer_arn: String,
    pub port: i64,
    pub protocol: String,
    pub default_actions: Vec<ListenerAction>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct ListenerAction {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(rename = "targetGroupARN")]
    pub target_group_arn: String,
}
