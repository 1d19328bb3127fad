pub mod reconciler {
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
    };

    use http::{Request, Response};
    use hyper::Body;
    use k8s_openapi::{
        api::core::v1::{
            LoadBalancerIngress, LoadBalancerStatus, Pod, PodStatus, Service, ServiceStatus,
        },
        apimachinery::pkg::apis::meta::v1::OwnerReference,
    };
    use kube::{core::ObjectMeta, discovery::ApiResource, Client, Resource, ResourceExt};
    use prometheus::Registry;
    use serde::{de::DeserializeOwned, Serialize};

    use crate::{
        controller::{
            context::{Context, ContextWith},
            metrics::Metrics,
            network::status::{NETWORK_CONF_ANNOTATION, NETWORK_TYPE_ANNOTATION},
        },
        crd::target_group::{
            TargetGroup, TargetGroupSpec, SYNC_STATUS_LABEL, SYNC_STATUS_PENDING,
            TARGET_GROUP_LB_ANNOTATION, TARGET_GROUP_POD_LABEL, TARGET_GROUP_PORT_ANNOTATION,
            TARGET_GROUP_PROTOCOL_ANNOTATION,
        },
    };

    pub type ApiServerHandle = tower_test::mock::Handle<Request<Body>, Response<Body>>;
    pub struct ApiServerVerifier(pub ApiServerHandle);

    pub async fn timeout_after_1s(handle: tokio::task::JoinHandle<()>) {
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("timeout on mock apiserver")
            .expect("scenario succeeded")
    }

    pub fn mock_client() -> (Client, ApiServerVerifier) {
        let (mock_service, handle) = tower_test::mock::pair::<Request<Body>, Response<Body>>();
        (
            Client::new(mock_service, "default"),
            ApiServerVerifier(handle),
        )
    }

    pub fn test_metrics() -> (Arc<Mutex<Metrics>>, Registry) {
        let registry = Registry::default();
        let metrics = Metrics::default().register(&registry).unwrap();
        (Arc::new(Mutex::new(metrics)), registry)
    }

    impl<T: Clone> ContextWith<T> {
        pub fn test(component: T) -> (Arc<Self>, ApiServerVerifier, Registry) {
            let (client, verifier) = mock_client();
            let (metrics, registry) = test_metrics();
            let ctx = Context {
                client,
                metrics,
                diagnostics: Arc::default(),
                interval: 30,
            };
            let ctx_with = Self {
                inner: ctx,
                component,
            };
            (Arc::new(ctx_with), verifier, registry)
        }
    }

    fn base_uri<T: Resource<DynamicType = ()>>() -> String {
        let api_resource = ApiResource::erase::<T>(&());
        if api_resource.group.is_empty() {
            format!("/api/{}", api_resource.api_version)
        } else {
            format!("/apis/{}", api_resource.api_version)
        }
    }

    // Path of the collection the resource lives in.
    pub fn collection_path<T: Resource<DynamicType = ()>>(namespace: Option<&str>) -> String {
        let api_resource = ApiResource::erase::<T>(&());
        match namespace {
            Some(ns) => format!(
                "{}/namespaces/{}/{}",
                base_uri::<T>(),
                ns,
                api_resource.plural
            ),
            None => format!("{}/{}", base_uri::<T>(), api_resource.plural),
        }
    }

    pub fn resource_path<T: Resource<DynamicType = ()>>(res: &T) -> String {
        format!(
            "{}/{}",
            collection_path::<T>(res.namespace().as_deref()),
            res.name_any()
        )
    }

    // GET/PUT/PATCH/DELETE hit the object path, POST and LIST hit the collection.
    pub fn assert_resource_request<T: Resource<DynamicType = ()>>(
        request: &Request<Body>,
        res: &T,
        list: bool,
        method: http::Method,
    ) {
        assert_eq!(request.method(), method);
        let path = if list || method == http::Method::POST {
            collection_path::<T>(res.namespace().as_deref())
        } else {
            resource_path(res)
        };
        assert_eq!(request.uri().path(), path);
    }

    pub fn assert_label_selector(request: &Request<Body>, selector: &str) {
        let query = request.uri().query().unwrap_or_default();
        let encoded = selector.replace('/', "%2F").replace('=', "%3D");
        assert!(
            query.contains(&format!("labelSelector={encoded}")),
            "unexpected query: {query}"
        );
    }

    pub async fn request_body<T: DeserializeOwned>(request: Request<Body>) -> (T, Vec<u8>) {
        let bytes = hyper::body::to_bytes(request.into_body()).await.unwrap();
        (serde_json::from_slice(&bytes).unwrap(), bytes.to_vec())
    }

    pub fn api_server_response_not_found<T: Resource<DynamicType = ()>>(res: &T) -> String {
        let api_resource = ApiResource::erase::<T>(&());
        let (group_kind, details) = if api_resource.group.is_empty() {
            (api_resource.plural.clone(), String::new())
        } else {
            (
                format!("{}.{}", api_resource.plural, api_resource.group),
                format!(r#""group": "{}","#, api_resource.group),
            )
        };
        format!(
            r#"{{
  "kind": "Status",
  "apiVersion": "v1",
  "metadata": {{}},
  "status": "Failure",
  "message": "{} \"{}\" not found",
  "reason": "NotFound",
  "details": {{
    "name": "{}",
    {}
    "kind": "{}"
  }},
  "code": 404
}}"#,
            group_kind,
            res.name_any(),
            res.name_any(),
            details,
            api_resource.plural,
        )
    }

    pub fn api_server_response_resource<T: Serialize>(res: &T) -> Vec<u8> {
        serde_json::to_vec(res).unwrap()
    }

    pub fn ok_response(body: Vec<u8>) -> Response<Body> {
        Response::builder().body(Body::from(body)).unwrap()
    }

    pub fn not_found_response<T: Resource<DynamicType = ()>>(res: &T) -> Response<Body> {
        Response::builder()
            .status(http::StatusCode::NOT_FOUND)
            .body(Body::from(api_server_response_not_found(res)))
            .unwrap()
    }

    pub const TEST_NAMESPACE: &str = "default";
    pub const TEST_POD_IP: &str = "10.100.0.5";

    pub fn test_pod(name: &str, network_type: &str, conf: &[(&str, &str)]) -> Pod {
        let conf = serde_json::to_string(
            &conf
                .iter()
                .map(|(k, v)| serde_json::json!({"name": k, "value": v}))
                .collect::<Vec<serde_json::Value>>(),
        )
        .unwrap();
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(TEST_NAMESPACE.to_string()),
                uid: Some(format!("{name}-uid")),
                annotations: Some(BTreeMap::from([
                    (NETWORK_TYPE_ANNOTATION.to_string(), network_type.to_string()),
                    (NETWORK_CONF_ANNOTATION.to_string(), conf),
                ])),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                pod_ip: Some(TEST_POD_IP.to_string()),
                ..Default::default()
            }),
        }
    }

    pub fn with_game_server_set_owner(mut pod: Pod, gss: &str) -> Pod {
        pod.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "game.kruise.io/v1alpha1".to_string(),
            kind: "GameServerSet".to_string(),
            name: gss.to_string(),
            uid: format!("{gss}-uid"),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]);
        pod
    }

    pub fn with_ingress(mut svc: Service, ip: &str) -> Service {
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(ip.to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        svc
    }

    pub fn test_target_group(name: &str, lb_arn: &str, port: i32) -> TargetGroup {
        let mut tg = TargetGroup::new(
            name,
            TargetGroupSpec {
                name: name.to_string(),
                protocol: "TCP".to_string(),
                port: 7777,
                target_type: "ip".to_string(),
                vpc_id: "vpc-0123".to_string(),
                ..Default::default()
            },
        );
        tg.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        tg.metadata.labels = Some(BTreeMap::from([
            (SYNC_STATUS_LABEL.to_string(), SYNC_STATUS_PENDING.to_string()),
            (TARGET_GROUP_POD_LABEL.to_string(), "gs-0".to_string()),
        ]));
        tg.metadata.annotations = Some(BTreeMap::from([
            (TARGET_GROUP_LB_ANNOTATION.to_string(), lb_arn.to_string()),
            (TARGET_GROUP_PORT_ANNOTATION.to_string(), port.to_string()),
            (TARGET_GROUP_PROTOCOL_ANNOTATION.to_string(), "TCP".to_string()),
        ]));
        tg
    }
}
