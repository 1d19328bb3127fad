pub use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Subset of the AWS Load Balancer Controller's TargetGroupBinding.
#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(
    group = "elbv2.k8s.aws",
    version = "v1beta1",
    kind = "TargetGroupBinding",
    namespaced
)]
#[kube(
    printcolumn = r#"{"name":"SERVICE", "type":"string", "description":"bound service", "jsonPath":".spec.serviceRef.name"}"#,
    printcolumn = r#"{"name":"PORT", "type":"integer", "description":"bound service port", "jsonPath":".spec.serviceRef.port"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "description":"Date from created", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupBindingSpec {
    #[serde(rename = "targetGroupARN")]
    pub target_group_arn: String,
    pub target_type: String,
    pub service_ref: ServiceReference,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
pub struct ServiceReference {
    pub name: String,
    pub port: i32,
}
