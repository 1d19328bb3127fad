use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Patch, PatchParams},
    runtime::{
        controller::Action,
        finalizer::{finalizer, Event},
        watcher::Config,
        Controller,
    },
    Api, Client, ResourceExt,
};
use tracing::{field, Span};

use crate::{
    controller::{
        context::{error_policy, ContextWith, Ctx, State},
        error::Error,
        metrics::Metrics,
        network::{
            plugin::PluginManager,
            status::{get_network_status, NetworkState},
        },
    },
    util::get_namespace,
};

pub const POD_FINALIZER: &str = "network.fleetnet.io/finalizer";
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(5);

fn has_finalizer(pod: &Pod) -> bool {
    pod.finalizers().iter().any(|f| f.eq(POD_FINALIZER))
}

#[tracing::instrument(skip_all, fields(trace_id))]
pub async fn reconciler(
    pod: Arc<Pod>,
    ctx: Arc<ContextWith<PluginManager>>,
) -> Result<Action, Error> {
    // Pods outside any network plugin are never touched.
    if ctx.component.plugin_for(&pod).is_none() && !has_finalizer(&pod) {
        return Ok(Action::await_change());
    }

    let trace_id = fleetnetd_trace::telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    let _measure = {
        let metrics = ctx.metrics();
        let metrics = metrics.lock().map_err(|_| Error::FailedToGetLock)?;
        metrics.reconciliation(pod.as_ref());
        metrics.measure()
    };

    let ns = get_namespace::<Pod>(&pod).map_err(Error::KubeLibrary)?;
    let pods = Api::<Pod>::namespaced(ctx.client().clone(), &ns);

    finalizer(&pods, POD_FINALIZER, pod, |event| async {
        match event {
            Event::Apply(pod) => reconcile(&pods, &pod, ctx.clone()).await,
            Event::Cleanup(pod) => cleanup(&pod, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

#[tracing::instrument(skip_all)]
async fn reconcile(
    pods: &Api<Pod>,
    pod: &Pod,
    ctx: Arc<ContextWith<PluginManager>>,
) -> Result<Action, Error> {
    let plugin = match ctx.component.plugin_for(pod) {
        Some(plugin) => plugin,
        None => {
            tracing::warn!(
                name = pod.name_any(),
                "network plugin is not enabled for this pod"
            );
            return Ok(Action::await_change());
        }
    };

    tracing::info!(
        name = pod.name_any(),
        namespace = pod.namespace(),
        plugin = plugin.name(),
        "reconcile Pod network"
    );

    let updated = plugin.on_pod_updated(pod.clone()).await?;

    if updated.annotations().ne(pod.annotations()) {
        let patch = serde_json::json!({
            "metadata": {
                "annotations": updated.annotations(),
            }
        });
        pods.patch(&pod.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(Error::Kube)?;
    }
    ctx.record_event().await;

    let ready = get_network_status(&updated)
        .map(|status| status.current_network_state == NetworkState::Ready)
        .unwrap_or(false);
    if ready {
        Ok(Action::requeue(Duration::from_secs(ctx.interval())))
    } else {
        Ok(Action::requeue(NOT_READY_REQUEUE))
    }
}

#[tracing::instrument(skip_all)]
async fn cleanup(pod: &Pod, ctx: Arc<ContextWith<PluginManager>>) -> Result<Action, Error> {
    match ctx.component.plugin_for(pod) {
        Some(plugin) => {
            tracing::info!(
                name = pod.name_any(),
                namespace = pod.namespace(),
                plugin = plugin.name(),
                "clean up Pod network"
            );
            plugin.on_pod_deleted(pod).await?;
        }
        None => tracing::warn!(
            name = pod.name_any(),
            "network plugin is gone, drop the finalizer"
        ),
    }
    Ok(Action::await_change())
}

#[tracing::instrument(skip_all)]
pub async fn run(
    state: State,
    client: Client,
    interval: u64,
    plugins: PluginManager,
    metrics: Arc<Mutex<Metrics>>,
) {
    let pods = Api::<Pod>::all(client.clone());

    tracing::info!(plugins=?plugins.names(), "Start Pod watcher");

    Controller::new(pods, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(
            reconciler,
            error_policy::<Pod, Error, ContextWith<PluginManager>>,
            state.to_context_with(client, interval, plugins, metrics),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
