//! In-memory resource provider.
//!
//! Mutations apply at submission time and their operations turn `Done` after a
//! configurable number of polls. Faults (transient poll errors, failing
//! operations, lost creation races, failing gets) can be injected to exercise
//! the controller's error paths. Clones share state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{ProviderResult, ResourceProvider};
use crate::error::ProviderError;
use crate::model::{
    InstanceDescriptor, InstanceRef, MembershipSet, Operation, OperationStatus, Resource,
    ResourceHandle, ResourceKind, ResourceSpec, Scope,
};

/// Kind of mutating call recorded by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    AddMembers,
    RemoveMembers,
}

/// One mutating call, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub kind: MutationKind,
    pub handle: ResourceHandle,
    pub instances: Vec<InstanceRef>,
}

struct StoredResource {
    self_link: String,
    address: Option<String>,
    members: MembershipSet,
    spec: ResourceSpec,
}

struct PendingOperation {
    operation: Operation,
    polls_left: u32,
    failure: Option<String>,
}

#[derive(Default)]
struct State {
    inventory: BTreeMap<String, Vec<InstanceDescriptor>>,
    resources: BTreeMap<ResourceHandle, StoredResource>,
    operations: HashMap<String, PendingOperation>,
    mutations: Vec<Mutation>,
    polls: usize,
    polls_until_done: u32,
    transient_poll_failures: u32,
    fail_next_operation: Option<String>,
    create_races: BTreeSet<ResourceHandle>,
    vanishing: BTreeSet<ResourceHandle>,
    zones: BTreeSet<String>,
    get_errors: BTreeMap<ResourceHandle, ProviderError>,
    next_address: u32,
}

impl State {
    fn submit(&mut self, scope: &Scope, failure: Option<String>) -> Operation {
        let mut operation = Operation {
            id: format!("operation-{}", uuid::Uuid::new_v4()),
            scope: scope.clone(),
            status: OperationStatus::Pending,
            errors: Vec::new(),
            http_status: None,
        };

        if self.polls_until_done == 0 {
            finish(&mut operation, failure.as_deref());
        } else {
            self.operations.insert(
                operation.id.clone(),
                PendingOperation {
                    operation: operation.clone(),
                    polls_left: self.polls_until_done,
                    failure,
                },
            );
        }
        operation
    }

    fn record(&mut self, kind: MutationKind, handle: &ResourceHandle, instances: &[InstanceRef]) {
        debug!("memory provider: {:?} {}", kind, handle);
        self.mutations.push(Mutation {
            kind,
            handle: handle.clone(),
            instances: instances.to_vec(),
        });
    }

    fn store(&mut self, handle: &ResourceHandle, spec: &ResourceSpec) {
        let members = match spec {
            ResourceSpec::TargetPool { instances } => instances.iter().cloned().collect(),
            _ => MembershipSet::new(),
        };
        let address = if handle.kind == ResourceKind::Address {
            self.next_address += 1;
            Some(format!("203.0.113.{}", self.next_address))
        } else {
            None
        };
        self.resources.insert(
            handle.clone(),
            StoredResource {
                self_link: self_link(handle),
                address,
                members,
                spec: spec.clone(),
            },
        );
    }
}

fn finish(operation: &mut Operation, failure: Option<&str>) {
    operation.status = OperationStatus::Done;
    if let Some(message) = failure {
        operation.errors = vec![message.to_string()];
        operation.http_status = Some(400);
    }
}

fn self_link(handle: &ResourceHandle) -> String {
    let collection = match handle.kind {
        ResourceKind::TargetPool => "targetPools",
        ResourceKind::InstanceGroup => "instanceGroups",
        ResourceKind::Address => "addresses",
        ResourceKind::Firewall => "firewalls",
        ResourceKind::HealthCheck => "httpHealthChecks",
        ResourceKind::ForwardingRule => "forwardingRules",
    };
    format!("memory://{}/{}/{}", handle.scope, collection, handle.name)
}

/// In-memory [`ResourceProvider`].
#[derive(Clone, Default)]
pub struct MemoryProvider {
    state: Arc<Mutex<State>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an instance to its zone's inventory.
    pub fn add_instance(&self, instance: InstanceDescriptor) {
        self.lock()
            .inventory
            .entry(instance.zone.clone())
            .or_default()
            .push(instance);
    }

    /// Register a zone that has no instances yet.
    pub fn add_zone(&self, zone: &str) {
        self.lock().zones.insert(zone.to_string());
    }

    /// Remove an instance from every zone's inventory.
    pub fn remove_instance(&self, instance: &InstanceRef) {
        for instances in self.lock().inventory.values_mut() {
            instances.retain(|i| &i.instance != instance);
        }
    }

    /// Put a resource in place without recording a mutation.
    pub fn insert_resource(
        &self,
        handle: &ResourceHandle,
        spec: ResourceSpec,
        members: MembershipSet,
    ) {
        let mut state = self.lock();
        state.store(handle, &spec);
        if let Some(stored) = state.resources.get_mut(handle) {
            stored.members = members;
        }
    }

    /// Snapshot of a stored resource.
    pub fn resource(&self, handle: &ResourceHandle) -> Option<Resource> {
        self.lock().resources.get(handle).map(|r| Resource {
            handle: handle.clone(),
            self_link: r.self_link.clone(),
            address: r.address.clone(),
            members: r.members.clone(),
            spec: Some(r.spec.clone()),
        })
    }

    /// Handles of every stored resource.
    pub fn handles(&self) -> Vec<ResourceHandle> {
        self.lock().resources.keys().cloned().collect()
    }

    /// Operations need this many polls before turning `Done` (0 = done at submission).
    pub fn set_polls_until_done(&self, polls: u32) {
        self.lock().polls_until_done = polls;
    }

    /// The next `count` polls fail with a transport error.
    pub fn fail_polls(&self, count: u32) {
        self.lock().transient_poll_failures = count;
    }

    /// The next mutation is not applied and its operation ends with `message`.
    pub fn fail_next_operation(&self, message: &str) {
        self.lock().fail_next_operation = Some(message.to_string());
    }

    /// The next create of `handle` loses a race: another writer creates it first.
    pub fn race_create(&self, handle: &ResourceHandle) {
        self.lock().create_races.insert(handle.clone());
    }

    /// `handle` is deleted by another writer just before its next update,
    /// which then fails with `NotFound`.
    pub fn vanish_before_update(&self, handle: &ResourceHandle) {
        self.lock().vanishing.insert(handle.clone());
    }

    /// The next get of `handle` fails with `error`.
    pub fn fail_get(&self, handle: &ResourceHandle, error: ProviderError) {
        self.lock().get_errors.insert(handle.clone(), error);
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    pub fn poll_count(&self) -> usize {
        self.lock().polls
    }
}

#[async_trait]
impl ResourceProvider for MemoryProvider {
    async fn list_zones(&self, region: &str) -> ProviderResult<Vec<String>> {
        let prefix = format!("{}-", region);
        let state = self.lock();
        let zones: BTreeSet<&String> = state
            .inventory
            .keys()
            .chain(state.zones.iter())
            .filter(|z| z.starts_with(&prefix))
            .collect();
        Ok(zones.into_iter().cloned().collect())
    }

    async fn list_inventory(&self, zone: &str) -> ProviderResult<Vec<InstanceDescriptor>> {
        Ok(self.lock().inventory.get(zone).cloned().unwrap_or_default())
    }

    async fn get_resource(&self, handle: &ResourceHandle) -> ProviderResult<Option<Resource>> {
        if let Some(err) = self.lock().get_errors.remove(handle) {
            return Err(err);
        }
        Ok(self.resource(handle))
    }

    async fn create_resource(
        &self,
        handle: &ResourceHandle,
        spec: &ResourceSpec,
    ) -> ProviderResult<Operation> {
        let mut state = self.lock();
        if state.create_races.remove(handle) {
            state.store(handle, spec);
            return Err(ProviderError::Conflict(format!("{} already exists", handle)));
        }
        if state.resources.contains_key(handle) {
            return Err(ProviderError::Conflict(format!("{} already exists", handle)));
        }

        let failure = state.fail_next_operation.take();
        if failure.is_none() {
            state.store(handle, spec);
        }
        let seeded = match spec {
            ResourceSpec::TargetPool { instances } => instances.clone(),
            _ => Vec::new(),
        };
        state.record(MutationKind::Create, handle, &seeded);
        Ok(state.submit(&handle.scope, failure))
    }

    async fn update_resource(
        &self,
        handle: &ResourceHandle,
        spec: &ResourceSpec,
    ) -> ProviderResult<Operation> {
        let mut state = self.lock();
        if state.vanishing.remove(handle) {
            state.resources.remove(handle);
        }
        if !state.resources.contains_key(handle) {
            return Err(ProviderError::NotFound(handle.to_string()));
        }

        let failure = state.fail_next_operation.take();
        if failure.is_none()
            && let Some(stored) = state.resources.get_mut(handle)
        {
            stored.spec = spec.clone();
        }
        state.record(MutationKind::Update, handle, &[]);
        Ok(state.submit(&handle.scope, failure))
    }

    async fn delete_resource(&self, handle: &ResourceHandle) -> ProviderResult<Option<Operation>> {
        let mut state = self.lock();
        if !state.resources.contains_key(handle) {
            return Ok(None);
        }

        let failure = state.fail_next_operation.take();
        if failure.is_none() {
            state.resources.remove(handle);
        }
        state.record(MutationKind::Delete, handle, &[]);
        Ok(Some(state.submit(&handle.scope, failure)))
    }

    async fn add_members(
        &self,
        handle: &ResourceHandle,
        instances: &[InstanceRef],
    ) -> ProviderResult<Operation> {
        if !handle.kind.has_members() {
            return Err(ProviderError::Unsupported(format!("{} has no members", handle)));
        }
        let mut state = self.lock();
        if !state.resources.contains_key(handle) {
            return Err(ProviderError::NotFound(handle.to_string()));
        }

        let failure = state.fail_next_operation.take();
        if failure.is_none()
            && let Some(stored) = state.resources.get_mut(handle)
        {
            for instance in instances {
                stored.members.insert(instance.clone());
            }
        }
        state.record(MutationKind::AddMembers, handle, instances);
        Ok(state.submit(&handle.scope, failure))
    }

    async fn remove_members(
        &self,
        handle: &ResourceHandle,
        instances: &[InstanceRef],
    ) -> ProviderResult<Operation> {
        if !handle.kind.has_members() {
            return Err(ProviderError::Unsupported(format!("{} has no members", handle)));
        }
        let mut state = self.lock();
        if !state.resources.contains_key(handle) {
            return Err(ProviderError::NotFound(handle.to_string()));
        }

        let failure = state.fail_next_operation.take();
        if failure.is_none()
            && let Some(stored) = state.resources.get_mut(handle)
        {
            let removed: MembershipSet = instances.iter().cloned().collect();
            stored.members = stored.members.difference(&removed);
        }
        state.record(MutationKind::RemoveMembers, handle, instances);
        Ok(state.submit(&handle.scope, failure))
    }

    async fn poll_operation(&self, operation: &Operation) -> ProviderResult<Operation> {
        let mut state = self.lock();
        state.polls += 1;
        if state.transient_poll_failures > 0 {
            state.transient_poll_failures -= 1;
            return Err(ProviderError::Transport("connection reset by peer".into()));
        }

        let pending = state
            .operations
            .get_mut(&operation.id)
            .ok_or_else(|| ProviderError::NotFound(format!("operation {}", operation.id)))?;
        pending.polls_left = pending.polls_left.saturating_sub(1);
        if pending.polls_left == 0 {
            pending.operation.status = OperationStatus::Done;
            let failure = pending.failure.clone();
            finish(&mut pending.operation, failure.as_deref());
        } else {
            pending.operation.status = OperationStatus::Running;
        }
        Ok(pending.operation.clone())
    }
}
