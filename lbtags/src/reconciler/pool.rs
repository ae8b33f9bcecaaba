//! Membership reconciler for target pools and instance groups.

use tracing::{debug, info};

use super::ensure::{Outcome, create_or_adopt};
use crate::diff::MembershipDiff;
use crate::error::{Error, Result};
use crate::model::{MembershipSet, ResourceHandle, ResourceSpec};
use crate::poller::OperationPoller;
use crate::provider::ResourceProvider;

/// What converging one pool or group changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub handle: ResourceHandle,
    pub created: bool,
    pub added: MembershipSet,
    pub removed: MembershipSet,
}

impl MembershipChange {
    fn new(handle: &ResourceHandle) -> Self {
        Self {
            handle: handle.clone(),
            created: false,
            added: MembershipSet::new(),
            removed: MembershipSet::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        !self.created && self.added.is_empty() && self.removed.is_empty()
    }
}

/// Bring the members of `handle` to `desired`.
///
/// An absent pool is created from `create_spec` and the diff is skipped for
/// this pass. Kinds that cannot be seeded at creation get one add operation
/// right after.
pub async fn converge_membership<P>(
    provider: &P,
    poller: &OperationPoller,
    handle: &ResourceHandle,
    create_spec: &ResourceSpec,
    desired: &MembershipSet,
) -> Result<MembershipChange>
where
    P: ResourceProvider + ?Sized,
{
    if !handle.kind.has_members() {
        return Err(Error::Misuse(format!("{} does not hold instances", handle)));
    }

    let mut change = MembershipChange::new(handle);

    let Some(current) = provider.get_membership(handle).await? else {
        info!("{} does not exist, creating it with {} instances", handle, desired.len());
        if create_or_adopt(provider, poller, handle, create_spec).await? != Outcome::Created {
            return Ok(change);
        }
        change.created = true;

        if handle.kind.seeds_members() {
            change.added = desired.clone();
        } else if !desired.is_empty() {
            let op = provider.add_members(handle, &desired.to_vec()).await?;
            poller.wait(provider, op).await?;
            change.added = desired.clone();
        }
        return Ok(change);
    };

    debug!("{} currently holds: {}", handle, current.names());
    let diff = MembershipDiff::compute(desired, &current);
    if diff.is_empty() {
        info!("{} is up to date ({} instances)", handle, current.len());
        return Ok(change);
    }

    if !diff.to_add.is_empty() {
        info!("Adding to {}: {}", handle, diff.to_add.names());
        let op = provider.add_members(handle, &diff.to_add.to_vec()).await?;
        poller.wait(provider, op).await?;
    }
    if !diff.to_remove.is_empty() {
        info!("Removing from {}: {}", handle, diff.to_remove.names());
        let op = provider.remove_members(handle, &diff.to_remove.to_vec()).await?;
        poller.wait(provider, op).await?;
    }

    change.added = diff.to_add;
    change.removed = diff.to_remove;
    Ok(change)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceRef;
    use crate::provider::MemoryProvider;
    use crate::provider::memory::MutationKind;

    fn set(items: &[&str]) -> MembershipSet {
        items.iter().map(|s| InstanceRef::new(*s)).collect()
    }

    fn pool_spec(desired: &MembershipSet) -> ResourceSpec {
        ResourceSpec::TargetPool {
            instances: desired.to_vec(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_pool_is_seeded() {
        let provider = MemoryProvider::new();
        let poller = OperationPoller::default();
        let handle = ResourceHandle::target_pool("us-central1", "lb");
        let desired = set(&["A", "B"]);

        let spec = pool_spec(&desired);
        let change = converge_membership(&provider, &poller, &handle, &spec, &desired)
            .await
            .unwrap();
        assert!(change.created);
        assert_eq!(change.added, desired);

        let mutations = provider.mutations();
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].kind, MutationKind::Create);
        assert_eq!(provider.resource(&handle).unwrap().members, desired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_group_is_created_then_filled() {
        let provider = MemoryProvider::new();
        let poller = OperationPoller::default();
        let handle = ResourceHandle::instance_group("us-central1-a", "lb");
        let desired = set(&["A"]);
        let spec = ResourceSpec::InstanceGroup {
            network: "default".to_string(),
        };

        converge_membership(&provider, &poller, &handle, &spec, &desired)
            .await
            .unwrap();

        let kinds: Vec<_> = provider.mutations().iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MutationKind::Create, MutationKind::AddMembers]);
        assert_eq!(provider.resource(&handle).unwrap().members, desired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_remove_both_complete() {
        let provider = MemoryProvider::new();
        provider.set_polls_until_done(2);
        let poller = OperationPoller::default();
        let handle = ResourceHandle::target_pool("us-central1", "lb");
        provider.insert_resource(&handle, pool_spec(&set(&[])), set(&["A", "B"]));

        let desired = set(&["B", "C"]);
        let spec = pool_spec(&desired);
        let change = converge_membership(&provider, &poller, &handle, &spec, &desired)
            .await
            .unwrap();
        assert_eq!(change.added, set(&["C"]));
        assert_eq!(change.removed, set(&["A"]));
        assert_eq!(provider.mutations().len(), 2);
        assert_eq!(provider.poll_count(), 4);
        assert_eq!(provider.resource(&handle).unwrap().members, desired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converged_pool_issues_nothing() {
        let provider = MemoryProvider::new();
        let poller = OperationPoller::default();
        let handle = ResourceHandle::target_pool("us-central1", "lb");
        let desired = set(&["A"]);
        provider.insert_resource(&handle, pool_spec(&desired), desired.clone());

        let spec = pool_spec(&desired);
        let change = converge_membership(&provider, &poller, &handle, &spec, &desired)
            .await
            .unwrap();
        assert!(change.is_noop());
        assert!(provider.mutations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_create_race_skips_diff() {
        let provider = MemoryProvider::new();
        let poller = OperationPoller::default();
        let handle = ResourceHandle::target_pool("us-central1", "lb");
        provider.race_create(&handle);

        let desired = set(&["A"]);
        let spec = pool_spec(&desired);
        let change = converge_membership(&provider, &poller, &handle, &spec, &desired)
            .await
            .unwrap();
        assert!(change.is_noop());
    }
}
