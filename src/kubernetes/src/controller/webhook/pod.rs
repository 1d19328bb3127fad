use actix_web::{web, HttpRequest, HttpResponse};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    ResourceExt,
};

use crate::{
    controller::network::plugin::PluginManager,
    util::{escape_slash, get_namespaced_name},
};

// Annotation changes as add operations. An absent map is added whole.
pub fn annotation_patch(original: &Pod, mutated: &Pod) -> json_patch::Patch {
    let after = mutated.annotations();
    if original.metadata.annotations.is_none() {
        if after.is_empty() {
            return json_patch::Patch(Vec::new());
        }
        return json_patch::Patch(vec![json_patch::PatchOperation::Add(
            json_patch::AddOperation {
                path: "/metadata/annotations".to_string(),
                value: serde_json::json!(after),
            },
        )]);
    }

    let before = original.annotations();
    let patches = after
        .iter()
        .filter(|(k, v)| before.get(*k) != Some(*v))
        .map(|(k, v)| {
            json_patch::PatchOperation::Add(json_patch::AddOperation {
                path: format!("/metadata/annotations/{}", escape_slash(k)),
                value: serde_json::Value::String(v.clone()),
            })
        })
        .collect();
    json_patch::Patch(patches)
}

#[tracing::instrument(skip_all)]
pub async fn handle_mutation(
    req: HttpRequest,
    body: web::Json<AdmissionReview<Pod>>,
    plugins: &PluginManager,
) -> HttpResponse {
    if let Some(content_type) = req.head().headers.get("content-type") {
        if content_type != "application/json" {
            let msg = format!("invalid content-type: {:?}", content_type);

            return HttpResponse::BadRequest().json(msg);
        }
    }

    let admission_req: AdmissionRequest<Pod> = match body.into_inner().try_into() {
        Ok(req) => req,
        Err(e) => {
            tracing::error!("invalid request: {}", e);
            return HttpResponse::InternalServerError()
                .json(&AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let resp = AdmissionResponse::from(&admission_req);

    if admission_req.operation != Operation::Create {
        return HttpResponse::Ok().json(resp.into_review());
    }
    let pod = match admission_req.object {
        Some(pod) => pod,
        None => return HttpResponse::Ok().json(resp.into_review()),
    };
    let plugin = match plugins.plugin_for(&pod) {
        Some(plugin) => plugin,
        None => return HttpResponse::Ok().json(resp.into_review()),
    };

    // Pods are always admitted. The pod controller retries the setup later.
    let mutated = match plugin.on_pod_added(pod.clone()).await {
        Ok(mutated) => mutated,
        Err(e) => {
            tracing::error!(error=?e, name = pod.name_any(), plugin = plugin.name(), "failed to prepare pod network");
            return HttpResponse::Ok().json(resp.into_review());
        }
    };

    let patch = annotation_patch(&pod, &mutated);
    if patch.0.is_empty() {
        return HttpResponse::Ok().json(resp.into_review());
    }
    tracing::info!(
        name = get_namespaced_name(&pod),
        plugin = plugin.name(),
        "initialize network status"
    );
    match resp.clone().with_patch(patch) {
        Ok(resp) => HttpResponse::Ok().json(resp.into_review()),
        Err(e) => {
            tracing::error!(error=?e, name = pod.name_any(), "failed to handle request");
            HttpResponse::Ok().json(resp.into_review())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::test::TestRequest;
    use async_trait::async_trait;

    use crate::{
        controller::{
            error::Error,
            network::{
                plugin::NetworkPlugin,
                status::{
                    get_network_status, set_network_status, NetworkStatus,
                    NETWORK_STATUS_ANNOTATION,
                },
            },
        },
        fixture::reconciler::test_pod,
    };

    use super::*;

    struct InitPlugin {
        fail: bool,
    }

    #[async_trait]
    impl NetworkPlugin for InitPlugin {
        fn name(&self) -> &'static str {
            "Stub-LB"
        }

        async fn init(&self) -> Result<(), Error> {
            Ok(())
        }

        async fn on_pod_added(&self, mut pod: Pod) -> Result<Pod, Error> {
            if self.fail {
                return Err(Error::MissingParameter("NlbIds".to_string()));
            }
            if get_network_status(&pod).is_none() {
                set_network_status(&mut pod, &NetworkStatus::new("Stub-LB"))?;
            }
            Ok(pod)
        }

        async fn on_pod_updated(&self, pod: Pod) -> Result<Pod, Error> {
            Ok(pod)
        }

        async fn on_pod_deleted(&self, _pod: &Pod) -> Result<(), Error> {
            Ok(())
        }
    }

    fn plugins(fail: bool) -> PluginManager {
        let mut manager = PluginManager::new();
        manager.register(Arc::new(InitPlugin { fail }));
        manager
    }

    fn review(pod: &Pod, operation: &str) -> AdmissionReview<Pod> {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "name": pod.name_any(),
                "namespace": "default",
                "operation": operation,
                "userInfo": {"username": "system:serviceaccount:kruise-system:kruise-manager"},
                "object": pod,
                "dryRun": false,
            }
        }))
        .unwrap()
    }

    async fn response(resp: HttpResponse) -> serde_json::Value {
        let body = actix_web::body::to_bytes(resp.into_body()).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn work_annotation_patch() {
        let mut original = test_pod("gs-0", "Stub-LB", &[]);
        let mut mutated = original.clone();
        set_network_status(&mut mutated, &NetworkStatus::new("Stub-LB")).unwrap();
        let patch = serde_json::to_value(annotation_patch(&original, &mutated)).unwrap();
        assert_eq!(patch.as_array().unwrap().len(), 1);
        assert_eq!(patch[0]["op"], "add");
        assert_eq!(
            patch[0]["path"],
            "/metadata/annotations/game.kruise.io~1network-status"
        );

        original.metadata.annotations = None;
        let patch = serde_json::to_value(annotation_patch(&original, &mutated)).unwrap();
        assert_eq!(patch[0]["path"], "/metadata/annotations");
        assert!(patch[0]["value"][NETWORK_STATUS_ANNOTATION].is_string());

        assert!(annotation_patch(&mutated, &mutated).0.is_empty());
    }

    #[tokio::test]
    async fn patch_network_status_on_create() {
        let pod = test_pod("gs-0", "Stub-LB", &[]);
        let req = TestRequest::default()
            .insert_header(("content-type", "application/json"))
            .to_http_request();

        let resp = handle_mutation(req, web::Json(review(&pod, "CREATE")), &plugins(false)).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::OK);
        let body = response(resp).await;
        assert_eq!(body["response"]["allowed"], true);
        assert_eq!(body["response"]["patchType"], "JSONPatch");
    }

    #[tokio::test]
    async fn admit_unchanged_on_plugin_failure() {
        let pod = test_pod("gs-0", "Stub-LB", &[]);
        let req = TestRequest::default().to_http_request();

        let resp = handle_mutation(req, web::Json(review(&pod, "CREATE")), &plugins(true)).await;
        let body = response(resp).await;
        assert_eq!(body["response"]["allowed"], true);
        assert!(body["response"]["patch"].is_null());
    }

    #[tokio::test]
    async fn admit_unchanged_on_update() {
        let pod = test_pod("gs-0", "Stub-LB", &[]);
        let req = TestRequest::default().to_http_request();

        let resp = handle_mutation(req, web::Json(review(&pod, "UPDATE")), &plugins(false)).await;
        let body = response(resp).await;
        assert_eq!(body["response"]["allowed"], true);
        assert!(body["response"]["patch"].is_null());
    }

    #[tokio::test]
    async fn reject_invalid_content_type() {
        let pod = test_pod("gs-0", "Stub-LB", &[]);
        let req = TestRequest::default()
            .insert_header(("content-type", "text/plain"))
            .to_http_request();

        let resp = handle_mutation(req, web::Json(review(&pod, "CREATE")), &plugins(false)).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }
}
