//! Data model shared by the selector, differ, controller and providers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Provider-stable instance identifier (the instance's canonical URL).
///
/// Two refs denote the same instance iff their strings are byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceRef(String);

impl InstanceRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, used for human-readable logging only.
    pub fn short_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of one instance as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub instance: InstanceRef,
    pub name: String,
    pub zone: String,
    pub tags: BTreeSet<String>,
    pub labels: BTreeMap<String, String>,
}

/// Set of instances belonging to a pool or group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSet(BTreeSet<InstanceRef>);

impl MembershipSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instance: InstanceRef) -> bool {
        self.0.insert(instance)
    }

    pub fn contains(&self, instance: &InstanceRef) -> bool {
        self.0.contains(instance)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstanceRef> {
        self.0.iter()
    }

    /// Members of `self` that are absent from `other`.
    pub fn difference(&self, other: &MembershipSet) -> MembershipSet {
        self.0.difference(&other.0).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<InstanceRef> {
        self.0.iter().cloned().collect()
    }

    /// Short names joined for log lines.
    pub fn names(&self) -> String {
        self.0
            .iter()
            .map(InstanceRef::short_name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromIterator<InstanceRef> for MembershipSet {
    fn from_iter<I: IntoIterator<Item = InstanceRef>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for MembershipSet {
    type Item = InstanceRef;
    type IntoIter = std::collections::btree_set::IntoIter<InstanceRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Where a resource or operation lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Global,
    Region(String),
    Zone(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Region(r) => write!(f, "regions/{}", r),
            Scope::Zone(z) => write!(f, "zones/{}", z),
        }
    }
}

/// Kinds of resources managed for one load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    TargetPool,
    InstanceGroup,
    Address,
    Firewall,
    HealthCheck,
    ForwardingRule,
}

impl ResourceKind {
    /// Whether the resource carries an instance membership.
    pub fn has_members(self) -> bool {
        matches!(self, ResourceKind::TargetPool | ResourceKind::InstanceGroup)
    }

    /// Whether creation accepts the initial membership.
    ///
    /// Instance groups are always created empty and filled afterwards.
    pub fn seeds_members(self) -> bool {
        matches!(self, ResourceKind::TargetPool)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::TargetPool => "target pool",
            ResourceKind::InstanceGroup => "instance group",
            ResourceKind::Address => "address",
            ResourceKind::Firewall => "firewall rule",
            ResourceKind::HealthCheck => "health check",
            ResourceKind::ForwardingRule => "forwarding rule",
        };
        f.write_str(s)
    }
}

/// Identity of a managed resource: `(kind, scope, name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub scope: Scope,
    pub name: String,
}

impl ResourceHandle {
    pub fn target_pool(region: &str, name: &str) -> Self {
        Self::new(ResourceKind::TargetPool, Scope::Region(region.to_string()), name)
    }

    pub fn instance_group(zone: &str, name: &str) -> Self {
        Self::new(ResourceKind::InstanceGroup, Scope::Zone(zone.to_string()), name)
    }

    pub fn address(region: &str, name: &str) -> Self {
        Self::new(ResourceKind::Address, Scope::Region(region.to_string()), name)
    }

    pub fn firewall(name: &str) -> Self {
        Self::new(ResourceKind::Firewall, Scope::Global, name)
    }

    pub fn health_check(name: &str) -> Self {
        Self::new(ResourceKind::HealthCheck, Scope::Global, name)
    }

    pub fn forwarding_rule(region: &str, name: &str) -> Self {
        Self::new(
            ResourceKind::ForwardingRule,
            Scope::Region(region.to_string()),
            name,
        )
    }

    fn new(kind: ResourceKind, scope: Scope, name: &str) -> Self {
        Self {
            kind,
            scope,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.scope, self.name)
    }
}

/// Desired configuration submitted on create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    TargetPool {
        instances: Vec<InstanceRef>,
    },
    InstanceGroup {
        network: String,
    },
    Address,
    Firewall {
        network: String,
        ports: Vec<u16>,
        target_tags: Vec<String>,
    },
    HealthCheck {
        port: u16,
        request_path: String,
    },
    ForwardingRule {
        ip_address: String,
        target: String,
        port_range: String,
    },
}

impl ResourceSpec {
    /// Compare the settings that convergence corrects on drift.
    ///
    /// Networks compare by their last path segment, so a bare network name
    /// matches the URL a provider reports back. Port and tag order is ignored.
    pub fn matches(&self, observed: &ResourceSpec) -> bool {
        match (self, observed) {
            (
                ResourceSpec::Firewall {
                    network,
                    ports,
                    target_tags,
                },
                ResourceSpec::Firewall {
                    network: observed_network,
                    ports: observed_ports,
                    target_tags: observed_tags,
                },
            ) => {
                basename(network) == basename(observed_network)
                    && sorted(ports) == sorted(observed_ports)
                    && sorted(target_tags) == sorted(observed_tags)
            }
            (a, b) => a == b,
        }
    }
}

fn basename(s: &str) -> &str {
    s.rsplit('/').next().unwrap_or(s)
}

fn sorted<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    let mut v = items.to_vec();
    v.sort();
    v.dedup();
    v
}

/// A resource as observed through a get call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub handle: ResourceHandle,
    pub self_link: String,
    /// Allocated IP, for addresses.
    pub address: Option<String>,
    /// Current members, for target pools and instance groups.
    pub members: MembershipSet,
    /// Observed settings, when the provider reports them.
    pub spec: Option<ResourceSpec>,
}

/// Status of an asynchronous provider operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

/// Handle for an in-flight mutation returned by every mutating provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub id: String,
    pub scope: Scope,
    pub status: OperationStatus,
    pub errors: Vec<String>,
    pub http_status: Option<u16>,
}

impl Operation {
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// First embedded error message, if the operation failed.
    pub fn error_message(&self) -> Option<&str> {
        self.errors.first().map(String::as_str)
    }
}
