//! Load balancer controller - converges every managed resource in dependency order.

use async_trait::async_trait;
use tracing::{info, warn};

use super::Reconciler;
use super::ensure::{Outcome, ensure_resource, remove_resource, spec_drifted};
use super::pool::{MembershipChange, converge_membership};
use crate::config::{HEALTH_CHECK_PATH, LbConfig};
use crate::error::{ProviderError, Result};
use crate::model::{InstanceDescriptor, MembershipSet, ResourceHandle, ResourceSpec};
use crate::poller::OperationPoller;
use crate::provider::ResourceProvider;
use crate::selector;

/// Summary of one convergence pass.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    /// Instances that matched the selector.
    pub desired: MembershipSet,
    /// Target pool first, then instance groups in zone order.
    pub memberships: Vec<MembershipChange>,
    /// External IP of the load balancer.
    pub address: String,
    pub created: Vec<ResourceHandle>,
    pub updated: Vec<ResourceHandle>,
}

impl PassReport {
    /// Nothing was mutated.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.memberships.iter().all(MembershipChange::is_noop)
    }

    fn record(&mut self, handle: &ResourceHandle, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created.push(handle.clone()),
            Outcome::Updated => self.updated.push(handle.clone()),
            Outcome::Unchanged | Outcome::Adopted => {}
        }
    }
}

/// Summary of a teardown.
#[derive(Debug, Clone, Default)]
pub struct TeardownReport {
    /// Resources that existed and were deleted, in deletion order.
    pub deleted: Vec<ResourceHandle>,
}

/// Converges target pool, instance groups, address, firewall, health checks
/// and forwarding rule of one load balancer.
pub struct LoadBalancerController<P> {
    provider: P,
    poller: OperationPoller,
}

impl<P: ResourceProvider> LoadBalancerController<P> {
    pub fn new(provider: P, poller: OperationPoller) -> Self {
        Self { provider, poller }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run one convergence pass.
    ///
    /// Any unabsorbed error aborts the rest of the pass; earlier mutations stay
    /// in place for the next pass to build on.
    pub async fn converge(&self, config: &LbConfig) -> Result<PassReport> {
        config.validate()?;
        info!(
            "Converging load balancer {} for instances with {}",
            config.name, config.selector
        );

        let zones = self.zones(config).await?;
        let inventory = self.inventory(&zones).await?;
        let matched = selector::select(&config.selector, &inventory);
        let mut report = PassReport {
            desired: matched.iter().map(|i| i.instance.clone()).collect(),
            ..Default::default()
        };
        info!(
            "{} instances match: [{}]",
            report.desired.len(),
            report.desired.names()
        );

        // 1. Target pool
        let pool = ResourceHandle::target_pool(&config.region, &config.name);
        let pool_spec = ResourceSpec::TargetPool {
            instances: report.desired.to_vec(),
        };
        let change =
            converge_membership(&self.provider, &self.poller, &pool, &pool_spec, &report.desired)
                .await?;
        if change.created {
            report.created.push(pool.clone());
        }
        report.memberships.push(change);

        // 1b. Per-zone instance groups
        if config.instance_groups {
            let group_spec = ResourceSpec::InstanceGroup {
                network: config.network.clone(),
            };
            for zone in &zones {
                let group = ResourceHandle::instance_group(zone, &config.name);
                let zone_desired: MembershipSet = matched
                    .iter()
                    .filter(|i| &i.zone == zone)
                    .map(|i| i.instance.clone())
                    .collect();
                let change = converge_membership(
                    &self.provider,
                    &self.poller,
                    &group,
                    &group_spec,
                    &zone_desired,
                )
                .await?;
                if change.created {
                    report.created.push(group);
                }
                report.memberships.push(change);
            }
        }

        // 2. External address
        let address = ResourceHandle::address(&config.region, &config.address_name);
        let ensured = ensure_resource(
            &self.provider,
            &self.poller,
            &address,
            &ResourceSpec::Address,
            |_| false,
        )
        .await?;
        report.record(&address, ensured.outcome);
        report.address = ensured.resource.address.ok_or_else(|| {
            ProviderError::NotFound(format!("{} has no IP allocated", address))
        })?;
        info!("Using external address {} ({})", config.address_name, report.address);

        // 3. Firewall rule
        let firewall = ResourceHandle::firewall(&config.name);
        let firewall_spec = ResourceSpec::Firewall {
            network: config.network.clone(),
            ports: config.ports.clone(),
            target_tags: config.firewall_target_tags(),
        };
        if config.firewall_is_untargeted() {
            warn!(
                "Firewall rule {} has no target tags, ports {:?} open on all of network {}",
                config.name, config.ports, config.network
            );
        }
        let ensured = ensure_resource(
            &self.provider,
            &self.poller,
            &firewall,
            &firewall_spec,
            spec_drifted(&firewall_spec),
        )
        .await?;
        report.record(&firewall, ensured.outcome);

        // 4. Health checks
        if config.health_check {
            for port in &config.ports {
                let check = ResourceHandle::health_check(&config.health_check_name(*port));
                let check_spec = ResourceSpec::HealthCheck {
                    port: *port,
                    request_path: HEALTH_CHECK_PATH.to_string(),
                };
                let ensured = ensure_resource(
                    &self.provider,
                    &self.poller,
                    &check,
                    &check_spec,
                    spec_drifted(&check_spec),
                )
                .await?;
                report.record(&check, ensured.outcome);
            }
        }

        // 5. Forwarding rule (needs the pool's self link)
        let target = self
            .provider
            .get_resource(&pool)
            .await?
            .ok_or_else(|| ProviderError::NotFound(pool.to_string()))?;
        let rule = ResourceHandle::forwarding_rule(&config.region, &config.name);
        let rule_spec = ResourceSpec::ForwardingRule {
            ip_address: report.address.clone(),
            target: target.self_link,
            port_range: config.port_range(),
        };
        let ensured =
            ensure_resource(&self.provider, &self.poller, &rule, &rule_spec, |_| false).await?;
        report.record(&rule, ensured.outcome);

        info!(
            "Load balancer {} converged ({} created, {} updated)",
            config.name,
            report.created.len(),
            report.updated.len()
        );
        Ok(report)
    }

    /// Delete the load balancer's resources in reverse dependency order.
    ///
    /// The external address is kept unless `config.release_address` is set.
    pub async fn teardown(&self, config: &LbConfig) -> Result<TeardownReport> {
        info!("Tearing down load balancer {}", config.name);

        let mut order = vec![
            ResourceHandle::forwarding_rule(&config.region, &config.name),
            ResourceHandle::target_pool(&config.region, &config.name),
        ];
        if config.instance_groups {
            let zones = self.zones(config).await?;
            order.extend(
                zones
                    .iter()
                    .map(|zone| ResourceHandle::instance_group(zone, &config.name)),
            );
        }
        order.push(ResourceHandle::firewall(&config.name));
        if config.health_check {
            order.extend(
                config
                    .ports
                    .iter()
                    .map(|port| ResourceHandle::health_check(&config.health_check_name(*port))),
            );
        }
        if config.release_address {
            order.push(ResourceHandle::address(&config.region, &config.address_name));
        } else {
            info!("Keeping external address {}", config.address_name);
        }

        let mut report = TeardownReport::default();
        for handle in order {
            if remove_resource(&self.provider, &self.poller, &handle).await? {
                report.deleted.push(handle);
            }
        }
        Ok(report)
    }

    /// Configured zones, or every zone of the region when none are configured.
    async fn zones(&self, config: &LbConfig) -> Result<Vec<String>> {
        if !config.zones.is_empty() {
            return Ok(config.zones.clone());
        }
        let zones = self.provider.list_zones(&config.region).await?;
        if zones.is_empty() {
            let message = format!("no zones in region {}", config.region);
            return Err(ProviderError::NotFound(message).into());
        }
        info!("Region {} has zones [{}]", config.region, zones.join(", "));
        Ok(zones)
    }

    async fn inventory(&self, zones: &[String]) -> Result<Vec<InstanceDescriptor>> {
        let mut inventory = Vec::new();
        for zone in zones {
            let instances = self.provider.list_inventory(zone).await?;
            info!("Found {} instances in {}", instances.len(), zone);
            inventory.extend(instances);
        }
        Ok(inventory)
    }
}

#[async_trait]
impl<P: ResourceProvider> Reconciler for LoadBalancerController<P> {
    type Spec = LbConfig;
    type Status = PassReport;

    async fn reconcile(&self, spec: &Self::Spec) -> Result<Self::Status> {
        self.converge(spec).await
    }

    async fn finalize(&self, spec: &Self::Spec) -> Result<()> {
        self.teardown(spec).await.map(|_| ())
    }
}
