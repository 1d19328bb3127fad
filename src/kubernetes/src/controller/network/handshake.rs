use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Patch, PatchParams},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::Instant;

use crate::{
    controller::error::Error,
    crd::target_group::{SYNC_STATUS_DONE, SYNC_STATUS_LABEL, SYNC_STATUS_PENDING},
    util::{get_namespace, get_namespaced_name},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(30);

/// Second phase of a label gated binding.
///
/// An intermediate resource is created with `sync-status=pending` and
/// reconciled by an external controller until it exposes a cloud identifier.
/// Completing the handshake creates the dependents and flips the label to `done`.
#[async_trait]
pub trait Handshake: Send + Sync {
    type Intermediate: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static;

    fn identifier(&self, obj: &Self::Intermediate) -> Option<String>;

    // Error reported by the external controller.
    fn failure(&self, obj: &Self::Intermediate) -> Option<String>;

    // Must be idempotent.
    async fn complete(
        &self,
        client: Client,
        obj: &Self::Intermediate,
        identifier: &str,
    ) -> Result<(), Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_POLL_DEADLINE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Skipped,
    Failed(String),
    Completed(String),
    TimedOut,
}

pub fn is_pending<K: Resource>(obj: &K) -> bool {
    obj.labels()
        .get(SYNC_STATUS_LABEL)
        .map(|v| v.eq(SYNC_STATUS_PENDING))
        .unwrap_or(false)
}

#[tracing::instrument(skip_all, fields(resource = get_namespaced_name(obj)))]
pub async fn advance<H: Handshake>(
    handshake: &H,
    client: Client,
    obj: &H::Intermediate,
    policy: &PollPolicy,
) -> Result<HandshakeOutcome, Error> {
    if !is_pending(obj) {
        return Ok(HandshakeOutcome::Skipped);
    }

    let ns = get_namespace(obj).map_err(Error::KubeLibrary)?;
    let name = obj.name_any();
    let api = Api::<H::Intermediate>::namespaced(client.clone(), &ns);

    let start = Instant::now();
    let mut current = obj.clone();
    let identifier = loop {
        if let Some(reason) = handshake.failure(&current) {
            tracing::warn!(reason, "intermediate resource reports a failure, wait for its controller");
            return Ok(HandshakeOutcome::Failed(reason));
        }
        if let Some(identifier) = handshake.identifier(&current) {
            break identifier;
        }
        if start.elapsed() >= policy.deadline {
            tracing::warn!(deadline=?policy.deadline, "identifier is not populated, give up until next event");
            return Ok(HandshakeOutcome::TimedOut);
        }
        tokio::time::sleep(policy.interval).await;
        current = match api.get_opt(&name).await.map_err(Error::Kube)? {
            Some(current) => current,
            None => return Ok(HandshakeOutcome::Skipped),
        };
        if !is_pending(&current) {
            return Ok(HandshakeOutcome::Skipped);
        }
    };

    handshake
        .complete(client.clone(), &current, &identifier)
        .await?;

    let patch = serde_json::json!({
        "metadata": {
            "labels": {
                SYNC_STATUS_LABEL: SYNC_STATUS_DONE,
            }
        }
    });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(Error::Kube)?;

    tracing::info!(identifier, "handshake completed");
    Ok(HandshakeOutcome::Completed(identifier))
}
