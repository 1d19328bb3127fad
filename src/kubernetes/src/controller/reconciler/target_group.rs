use std::sync::Arc;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, ResourceExt,
};
use tracing::{field, Span};

use crate::{
    controller::{
        cloud::aws_nlb::TargetGroupHandshake,
        context::{error_policy, ContextWith, Ctx, State},
        error::Error,
        metrics::Metrics,
        network::handshake::{advance, HandshakeOutcome, PollPolicy},
    },
    crd::target_group::{TargetGroup, SYNC_STATUS_LABEL},
};

#[tracing::instrument(skip_all, fields(trace_id))]
pub async fn reconciler(
    tg: Arc<TargetGroup>,
    ctx: Arc<ContextWith<PollPolicy>>,
) -> Result<Action, Error> {
    let trace_id = fleetnetd_trace::telemetry::get_trace_id();
    Span::current().record("trace_id", &field::display(&trace_id));

    let _measure = {
        let metrics = ctx.metrics();
        let metrics = metrics.lock().map_err(|_| Error::FailedToGetLock)?;
        metrics.reconciliation(tg.as_ref());
        metrics.measure()
    };

    tracing::info!(
        name = tg.name_any(),
        namespace = tg.namespace(),
        "reconcile TargetGroup"
    );

    let outcome = advance(
        &TargetGroupHandshake,
        ctx.client().clone(),
        tg.as_ref(),
        &ctx.component,
    )
    .await?;
    match &outcome {
        HandshakeOutcome::Completed(arn) => {
            tracing::info!(name = tg.name_any(), arn, "TargetGroup is bound")
        }
        HandshakeOutcome::Failed(reason) => {
            tracing::warn!(name = tg.name_any(), reason, "TargetGroup is not synced")
        }
        HandshakeOutcome::TimedOut => {
            tracing::warn!(name = tg.name_any(), "TargetGroup ARN is not populated yet")
        }
        HandshakeOutcome::Skipped => {}
    }
    ctx.record_event().await;

    // Status updates from ACK arrive as watch events.
    Ok(Action::await_change())
}

#[tracing::instrument(skip_all)]
pub async fn run(
    state: State,
    client: Client,
    interval: u64,
    policy: PollPolicy,
    metrics: Arc<std::sync::Mutex<Metrics>>,
) {
    let target_groups = Api::<TargetGroup>::all(client.clone());
    if let Err(e) = target_groups.list(&ListParams::default().limit(1)).await {
        tracing::error!("TargetGroup is not queryable; {e:?}. Is the ACK elbv2 CRD installed?");
        tracing::info!("Installation: https://aws-controllers-k8s.github.io/community/docs/community/installation/");
        std::process::exit(1);
    }

    tracing::info!("Start TargetGroup reconciler");

    Controller::new(
        target_groups,
        Config::default().labels(SYNC_STATUS_LABEL).any_semantic(),
    )
    .shutdown_on_signal()
    .run(
        reconciler,
        error_policy::<TargetGroup, Error, ContextWith<PollPolicy>>,
        state.to_context_with(client, interval, policy, metrics),
    )
    .filter_map(|x| async move { std::result::Result::ok(x) })
    .for_each(|_| futures::future::ready(()))
    .await;
}
