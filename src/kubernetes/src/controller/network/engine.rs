use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fleetnetd_portpool::{
    manager::{Allocation, PortAllocator, PortAllocatorInner},
    pool::PortRange,
};
use k8s_openapi::{
    api::core::v1::{Pod, Service},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
    api::{ListParams, PostParams},
    Api, Client, ResourceExt,
};

use crate::{
    controller::{error::Error, metrics::Metrics},
    crd::game_server_set::GameServerSet,
    util::{create_owner_reference, get_namespace, get_namespaced_name},
};

use super::{
    adapter::CloudAdapter,
    params::{parse_conf_annotation, NetworkConfig},
    plugin::NetworkPlugin,
    service::{
        addresses, config_hash, is_disabled, recorded_allocation, with_disabled, ServiceTemplate,
        OWNER_KEY_ANNOTATION, PLUGIN_LABEL,
    },
    status::{
        annotation, get_network_status, is_network_disabled, set_network_status, NetworkState,
        NetworkStatus, NETWORK_CONF_ANNOTATION,
    },
};

pub const GAME_SERVER_SET_KIND: &str = "GameServerSet";

/// What a reconciliation pass did to the backing Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Disabled,
    Enabled,
    Pending,
    Ready,
}

impl Outcome {
    pub fn state(&self) -> NetworkState {
        match self {
            Outcome::Ready => NetworkState::Ready,
            _ => NetworkState::NotReady,
        }
    }
}

/// Who an allocation belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Ownership {
    pub key: String,
    pub workload: Option<String>,
    pub reference: OwnerReference,
}

pub fn ownership(pod: &Pod, fixed: bool) -> Result<Ownership, Error> {
    let ns = get_namespace(pod).map_err(Error::KubeLibrary)?;
    if fixed {
        match pod
            .owner_references()
            .iter()
            .find(|o| o.kind.eq(GAME_SERVER_SET_KIND))
        {
            Some(owner) => {
                return Ok(Ownership {
                    key: format!("{ns}/{}", owner.name),
                    workload: Some(owner.name.clone()),
                    reference: owner.clone(),
                })
            }
            None => tracing::warn!(
                pod = get_namespaced_name(pod),
                "fixed network requested without GameServerSet owner, allocation follows the pod"
            ),
        }
    }
    Ok(Ownership {
        key: format!("{ns}/{}", pod.name_any()),
        workload: None,
        reference: create_owner_reference(pod),
    })
}

// (lb, used, capacity) of every known load balancer.
type Usage = Vec<(String, usize, usize)>;

fn usage(inner: &PortAllocatorInner) -> Usage {
    inner
        .pools
        .iter()
        .map(|(lb, pool)| (lb.clone(), pool.used_ports().len(), pool.capacity()))
        .collect()
}

/// Allocation engine of one cloud plugin.
///
/// Port pools and the allocation index live in the allocator and are only
/// touched under its lock. Cluster writes happen after the lock is released.
pub struct NetworkEngine<A: CloudAdapter> {
    adapter: A,
    allocator: PortAllocator,
    client: Client,
    metrics: Arc<Mutex<Metrics>>,
}

impl<A: CloudAdapter> NetworkEngine<A> {
    pub fn new(
        adapter: A,
        range: PortRange,
        client: Client,
        metrics: Arc<Mutex<Metrics>>,
    ) -> NetworkEngine<A> {
        NetworkEngine {
            adapter,
            allocator: PortAllocator::new(range),
            client,
            metrics,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn network_config(&self, pod: &Pod) -> Result<NetworkConfig, Error> {
        let raw = annotation(pod, NETWORK_CONF_ANNOTATION)
            .ok_or_else(|| Error::MissingParameter(NETWORK_CONF_ANNOTATION.to_string()))?;
        NetworkConfig::parse(&parse_conf_annotation(raw)?, self.adapter.schema())
    }

    /// Rebuilds pools and the allocation index from existing backing Services.
    #[tracing::instrument(skip_all, fields(plugin = self.adapter.name()))]
    pub async fn recover(&self) -> Result<usize, Error> {
        let services = Api::<Service>::all(self.client.clone());
        let lp = ListParams::default().labels(&format!("{PLUGIN_LABEL}={}", self.adapter.name()));
        let list = services.list(&lp).await.map_err(Error::Kube)?;

        let (recovered, usage) = {
            let mut inner = self
                .allocator
                .inner
                .lock()
                .map_err(|_| Error::FailedToGetLock)?;
            let mut recovered = 0;
            for svc in list.items.iter() {
                let allocation = match recorded_allocation(svc) {
                    Ok(allocation) => allocation,
                    Err(e) => {
                        tracing::warn!(service = get_namespaced_name(svc), error=?e, "skip unrecoverable Service");
                        continue;
                    }
                };
                match inner.recover(&allocation.owner_key, &allocation.lb_id, &allocation.ports) {
                    Ok(true) => recovered += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(service = get_namespaced_name(svc), error=?e, "skip conflicting allocation")
                    }
                }
            }
            inner.finish_recovery();
            (recovered, usage(&inner))
        };
        self.report(usage);

        tracing::info!(
            services = list.items.len(),
            allocations = recovered,
            "recovered port allocations"
        );
        Ok(recovered)
    }

    fn with_allocator<F>(&self, f: F) -> Result<Allocation, Error>
    where
        F: FnOnce(&mut PortAllocatorInner) -> Result<Allocation, fleetnetd_portpool::error::Error>,
    {
        let (allocation, usage) = {
            let mut inner = self
                .allocator
                .inner
                .lock()
                .map_err(|_| Error::FailedToGetLock)?;
            let allocation = f(&mut inner).map_err(Error::PortPool)?;
            (allocation, usage(&inner))
        };
        self.report(usage);
        Ok(allocation)
    }

    fn allocate(
        &self,
        owner_key: &str,
        config: &NetworkConfig,
        reshape: bool,
    ) -> Result<Allocation, Error> {
        let candidates = self.adapter.candidate_lbs(config);
        let count = config.backends.len();
        self.with_allocator(|inner| {
            if reshape {
                inner.lookup_or_reallocate(owner_key, &candidates, count)
            } else {
                inner.lookup_or_allocate(owner_key, &candidates, count)
            }
        })
    }

    fn reallocate_from(
        &self,
        previous_key: &str,
        owner_key: &str,
        config: &NetworkConfig,
    ) -> Result<Allocation, Error> {
        let candidates = self.adapter.candidate_lbs(config);
        let count = config.backends.len();
        self.with_allocator(|inner| inner.reallocate_from(previous_key, owner_key, &candidates, count))
    }

    // None when the ports recorded on the Service are held by another owner.
    fn tracked_allocation(&self, owner_key: &str, svc: &Service) -> Result<Option<Allocation>, Error> {
        {
            let inner = self
                .allocator
                .inner
                .lock()
                .map_err(|_| Error::FailedToGetLock)?;
            if let Some(allocation) = inner.get(owner_key) {
                return Ok(Some(allocation.clone()));
            }
        }
        let recorded = recorded_allocation(svc)?;
        tracing::warn!(
            owner = owner_key,
            lb = recorded.lb_id,
            ports = ?recorded.ports,
            "allocation is not tracked, adopt the one recorded on the Service"
        );
        match self.with_allocator(|inner| inner.adopt(owner_key, &recorded.lb_id, &recorded.ports)) {
            Ok(allocation) => Ok(Some(allocation)),
            Err(Error::PortPool(fleetnetd_portpool::error::Error::AllocationConflict(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // True when no other Service of the plugin records the owner key.
    async fn is_last_holder(
        &self,
        services: &Api<Service>,
        svc: &Service,
        owner_key: &str,
    ) -> Result<bool, Error> {
        let lp = ListParams::default().labels(&format!("{PLUGIN_LABEL}={}", self.adapter.name()));
        let list = services.list(&lp).await.map_err(Error::Kube)?;
        Ok(!list.items.iter().any(|other| {
            other.name_any().ne(&svc.name_any())
                && other.annotations().get(OWNER_KEY_ANNOTATION).map(|k| k.as_str()) == Some(owner_key)
        }))
    }

    fn report(&self, usage: Usage) {
        if let Ok(metrics) = self.metrics.lock() {
            for (lb, used, capacity) in usage.iter() {
                metrics.allocated_ports_set(self.adapter.name(), lb, *used as i64);
                metrics.max_ports_set(self.adapter.name(), lb, *capacity as i64);
            }
        }
    }

    fn render(
        &self,
        pod: &Pod,
        config: &NetworkConfig,
        hash: &str,
        allocation: &Allocation,
        owner: &Ownership,
        disabled: bool,
    ) -> Result<Service, Error> {
        ServiceTemplate {
            plugin: self.adapter.name(),
            service_type: self.adapter.service_type(),
            config,
            config_hash: hash,
            allocation,
            owner: owner.reference.clone(),
            annotations: self.adapter.service_annotations(config, allocation)?,
            disabled,
        }
        .build(pod)
    }

    #[allow(clippy::too_many_arguments)]
    async fn replace_service(
        &self,
        services: &Api<Service>,
        svc: &Service,
        pod: &Pod,
        config: &NetworkConfig,
        hash: &str,
        allocation: &Allocation,
        owner: &Ownership,
        disabled: bool,
    ) -> Result<(), Error> {
        let mut new_svc = self.render(pod, config, hash, allocation, owner, disabled)?;
        new_svc.metadata.resource_version = svc.resource_version();
        if let (Some(new_spec), Some(spec)) = (new_svc.spec.as_mut(), svc.spec.as_ref()) {
            new_spec.cluster_ip = spec.cluster_ip.clone();
            new_spec.cluster_ips = spec.cluster_ips.clone();
        }
        let replaced = services
            .replace(&svc.name_any(), &PostParams::default(), &new_svc)
            .await
            .map_err(Error::Kube)?;
        self.adapter
            .ensure_chain(self.client.clone(), &replaced, pod, allocation, config)
            .await
    }

    /// Runs one pass of the network state machine for a pod.
    #[tracing::instrument(skip_all, fields(plugin = self.adapter.name(), pod = get_namespaced_name(pod)))]
    pub async fn reconcile(&self, pod: &Pod) -> Result<(NetworkStatus, Outcome), Error> {
        let config = self.network_config(pod)?;
        let hash = config.hash()?;
        let owner = ownership(pod, config.fixed)?;
        let disabled = is_network_disabled(pod);
        let status =
            get_network_status(pod).unwrap_or_else(|| NetworkStatus::new(self.adapter.name()));

        let ns = get_namespace(pod).map_err(Error::KubeLibrary)?;
        let services = Api::<Service>::namespaced(self.client.clone(), &ns);

        let svc = match services
            .get_opt(&pod.name_any())
            .await
            .map_err(Error::Kube)?
        {
            Some(svc) => svc,
            None => {
                let allocation = self.allocate(&owner.key, &config, false)?;
                let svc = self.render(pod, &config, &hash, &allocation, &owner, disabled)?;
                tracing::info!(lb = allocation.lb_id, ports = ?allocation.ports, owner = owner.key, "create backing Service");
                let created = services
                    .create(&PostParams::default(), &svc)
                    .await
                    .map_err(Error::Kube)?;
                self.adapter
                    .ensure_chain(self.client.clone(), &created, pod, &allocation, &config)
                    .await?;
                return Ok((
                    status.transition(NetworkState::NotReady, vec![], vec![]),
                    Outcome::Created,
                ));
            }
        };

        if config_hash(&svc) != Some(hash.as_str()) {
            // An owner switch between the pod and its GameServerSet.
            let previous_key = match recorded_allocation(&svc)
                .ok()
                .map(|a| a.owner_key)
                .filter(|k| k.ne(&owner.key))
            {
                Some(previous) => self
                    .is_last_holder(&services, &svc, &previous)
                    .await?
                    .then_some(previous),
                None => None,
            };
            let allocation = match previous_key {
                Some(previous) => {
                    tracing::info!(previous = previous.as_str(), owner = owner.key, "move allocation to the new owner");
                    self.reallocate_from(&previous, &owner.key, &config)?
                }
                None => self.allocate(&owner.key, &config, true)?,
            };
            tracing::info!(lb = allocation.lb_id, ports = ?allocation.ports, owner = owner.key, "update backing Service on config drift");
            self.replace_service(&services, &svc, pod, &config, &hash, &allocation, &owner, disabled)
                .await?;
            return Ok((
                status.transition(NetworkState::NotReady, vec![], vec![]),
                Outcome::Updated,
            ));
        }

        let allocation = match self.tracked_allocation(&owner.key, &svc)? {
            Some(allocation) => allocation,
            None => {
                let allocation = self.allocate(&owner.key, &config, false)?;
                tracing::warn!(lb = allocation.lb_id, ports = ?allocation.ports, owner = owner.key, "recorded ports are held by another owner, update backing Service");
                self.replace_service(&services, &svc, pod, &config, &hash, &allocation, &owner, disabled)
                    .await?;
                return Ok((
                    status.transition(NetworkState::NotReady, vec![], vec![]),
                    Outcome::Updated,
                ));
            }
        };

        if disabled != is_disabled(&svc) {
            tracing::info!(disabled, "switch traffic of backing Service");
            services
                .replace(
                    &svc.name_any(),
                    &PostParams::default(),
                    &with_disabled(&svc, disabled),
                )
                .await
                .map_err(Error::Kube)?;
            let outcome = if disabled {
                Outcome::Disabled
            } else {
                Outcome::Enabled
            };
            return Ok((
                status.transition(NetworkState::NotReady, vec![], vec![]),
                outcome,
            ));
        }
        if disabled {
            return Ok((
                status.transition(NetworkState::NotReady, vec![], vec![]),
                Outcome::Disabled,
            ));
        }

        self.adapter
            .ensure_chain(self.client.clone(), &svc, pod, &allocation, &config)
            .await?;
        let endpoint = self
            .adapter
            .endpoint(self.client.clone(), &svc, &allocation, &config)
            .await?;
        let pod_ip = pod.status.as_ref().and_then(|s| s.pod_ip.clone());

        match (endpoint, pod_ip) {
            (Some(endpoint), Some(pod_ip)) => {
                let (internal, external) = addresses(
                    &config,
                    &allocation,
                    &pod_ip,
                    &endpoint.ip,
                    endpoint.end_point.as_deref(),
                );
                Ok((
                    status.transition(NetworkState::Ready, internal, external),
                    Outcome::Ready,
                ))
            }
            _ => {
                tracing::debug!("load balancer is not ready yet");
                Ok((
                    status.transition(NetworkState::NotReady, vec![], vec![]),
                    Outcome::Pending,
                ))
            }
        }
    }

    /// Releases the allocation of a deleted pod when its owner is gone.
    #[tracing::instrument(skip_all, fields(plugin = self.adapter.name(), pod = get_namespaced_name(pod)))]
    pub async fn release(&self, pod: &Pod) -> Result<Option<Allocation>, Error> {
        let fixed = match self.network_config(pod) {
            Ok(config) => config.fixed,
            Err(e) => {
                tracing::warn!(error=?e, "network config is unreadable, release as an ephemeral allocation");
                false
            }
        };
        let owner = ownership(pod, fixed)?;

        if let Some(workload) = owner.workload.as_ref() {
            let ns = get_namespace(pod).map_err(Error::KubeLibrary)?;
            let game_server_sets = Api::<GameServerSet>::namespaced(self.client.clone(), &ns);
            if let Some(gss) = game_server_sets
                .get_opt(workload)
                .await
                .map_err(Error::Kube)?
            {
                if gss.metadata.deletion_timestamp.is_none() {
                    tracing::info!(owner = owner.key, "keep fixed allocation while GameServerSet exists");
                    return Ok(None);
                }
            }
        }

        let (released, usage) = {
            let mut inner = self
                .allocator
                .inner
                .lock()
                .map_err(|_| Error::FailedToGetLock)?;
            let released = inner.release(&owner.key);
            (released, usage(&inner))
        };
        self.report(usage);

        match released.as_ref() {
            Some(allocation) => tracing::info!(owner = owner.key, lb = allocation.lb_id, ports = ?allocation.ports, "release allocation"),
            None => tracing::debug!(owner = owner.key, "allocation already released"),
        }
        Ok(released)
    }
}

#[async_trait]
impl<A: CloudAdapter> NetworkPlugin for NetworkEngine<A> {
    fn name(&self) -> &'static str {
        self.adapter.name()
    }

    async fn init(&self) -> Result<(), Error> {
        self.recover().await.map(|_| ())
    }

    async fn on_pod_added(&self, mut pod: Pod) -> Result<Pod, Error> {
        if get_network_status(&pod).is_none() {
            set_network_status(&mut pod, &NetworkStatus::new(self.adapter.name()))?;
        }
        Ok(pod)
    }

    async fn on_pod_updated(&self, mut pod: Pod) -> Result<Pod, Error> {
        let previous = get_network_status(&pod).map(|s| s.current_network_state);
        let status = match self.reconcile(&pod).await {
            Ok((status, outcome)) => {
                tracing::debug!(pod = get_namespaced_name(&pod), ?outcome, "network reconciled");
                if outcome == Outcome::Ready && previous != Some(NetworkState::Ready) {
                    if let Ok(metrics) = self.metrics.lock() {
                        metrics.network_ready_inc(self.adapter.name());
                    }
                }
                status
            }
            Err(e) if e.is_insufficient_ports() => {
                tracing::warn!(pod = get_namespaced_name(&pod), error=%e, "insufficient ports");
                get_network_status(&pod)
                    .unwrap_or_else(|| NetworkStatus::new(self.adapter.name()))
                    .transition(NetworkState::NotReady, vec![], vec![])
            }
            Err(e) => return Err(e),
        };
        set_network_status(&mut pod, &status)?;
        Ok(pod)
    }

    async fn on_pod_deleted(&self, pod: &Pod) -> Result<(), Error> {
        self.release(pod).await.map(|_| ())
    }
}
