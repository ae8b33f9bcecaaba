//! Shared test utilities for lbtags integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use lbtags::model::ResourceSpec;
use lbtags::{
    InstanceDescriptor, InstanceRef, LbConfig, LoadBalancerController, MemoryProvider,
    MembershipSet, OperationPoller, ResourceHandle, Selector,
};

pub const REGION: &str = "us-central1";
pub const ZONE_A: &str = "us-central1-a";
pub const ZONE_B: &str = "us-central1-b";

/// Instance `name` in `zone` carrying `tags`.
pub fn instance(zone: &str, name: &str, tags: &[&str]) -> InstanceDescriptor {
    InstanceDescriptor {
        instance: InstanceRef::new(format!(
            "https://www.googleapis.com/compute/v1/projects/test/zones/{}/instances/{}",
            zone, name
        )),
        name: name.to_string(),
        zone: zone.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        labels: BTreeMap::new(),
    }
}

/// Instance `name` in `zone` carrying `labels` and no tags.
pub fn labeled(zone: &str, name: &str, labels: &[(&str, &str)]) -> InstanceDescriptor {
    InstanceDescriptor {
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..instance(zone, name, &[])
    }
}

pub fn members(instances: &[&InstanceDescriptor]) -> MembershipSet {
    instances.iter().map(|i| i.instance.clone()).collect()
}

pub fn tag_selector(tags: &[&str]) -> Selector {
    let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
    Selector::from_parts(&tags, &[]).expect("valid tag selector")
}

pub fn label_selector(labels: &[&str]) -> Selector {
    let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
    Selector::from_parts(&[], &labels).expect("valid label selector")
}

/// Load balancer `lb` over zones a and b, port 443.
pub fn config(selector: Selector) -> LbConfig {
    LbConfig {
        name: "lb".to_string(),
        project: "test".to_string(),
        network: "default".to_string(),
        region: REGION.to_string(),
        zones: vec![ZONE_A.to_string(), ZONE_B.to_string()],
        ports: vec![443],
        address_name: "lb".to_string(),
        selector,
        instance_groups: false,
        health_check: false,
        release_address: false,
    }
}

/// Provider seeded with `instances`.
pub fn provider_with(instances: &[&InstanceDescriptor]) -> MemoryProvider {
    let provider = MemoryProvider::new();
    for instance in instances {
        provider.add_instance((*instance).clone());
    }
    provider
}

/// Controller over a clone of `provider`; both share state.
pub fn controller(provider: &MemoryProvider) -> LoadBalancerController<MemoryProvider> {
    LoadBalancerController::new(provider.clone(), OperationPoller::default())
}

pub fn pool() -> ResourceHandle {
    ResourceHandle::target_pool(REGION, "lb")
}

pub fn pool_members(provider: &MemoryProvider) -> MembershipSet {
    provider
        .resource(&pool())
        .expect("target pool exists")
        .members
}

pub fn stored_spec(provider: &MemoryProvider, handle: &ResourceHandle) -> ResourceSpec {
    provider
        .resource(handle)
        .and_then(|r| r.spec)
        .expect("resource exists")
}
