//! Resource providers.
//!
//! The controller only talks to the cloud through [`ResourceProvider`]:
//! - `gce`: Compute Engine v1 REST API
//! - `memory`: in-process provider used by tests

pub mod gce;
pub mod memory;

pub use gce::GceProvider;
pub use memory::MemoryProvider;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::{
    InstanceDescriptor, InstanceRef, MembershipSet, Operation, Resource, ResourceHandle,
    ResourceSpec,
};

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Capability interface over the resources of one project.
///
/// A get on an absent resource must return `Ok(None)`, never an error, and
/// creates racing an existing resource must fail with
/// [`ProviderError::Conflict`].
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Names of the zones in a region.
    async fn list_zones(&self, region: &str) -> ProviderResult<Vec<String>>;

    /// All instances in a zone.
    async fn list_inventory(&self, zone: &str) -> ProviderResult<Vec<InstanceDescriptor>>;

    /// Current state of a resource, `None` when it does not exist.
    async fn get_resource(&self, handle: &ResourceHandle) -> ProviderResult<Option<Resource>>;

    /// Submit creation.
    async fn create_resource(
        &self,
        handle: &ResourceHandle,
        spec: &ResourceSpec,
    ) -> ProviderResult<Operation>;

    /// Submit an in-place update. Fails with `NotFound` when absent.
    async fn update_resource(
        &self,
        handle: &ResourceHandle,
        spec: &ResourceSpec,
    ) -> ProviderResult<Operation>;

    /// Submit deletion. `None` when the resource was already absent.
    async fn delete_resource(&self, handle: &ResourceHandle) -> ProviderResult<Option<Operation>>;

    async fn add_members(
        &self,
        handle: &ResourceHandle,
        instances: &[InstanceRef],
    ) -> ProviderResult<Operation>;

    async fn remove_members(
        &self,
        handle: &ResourceHandle,
        instances: &[InstanceRef],
    ) -> ProviderResult<Operation>;

    /// Fresh status of a previously submitted operation.
    async fn poll_operation(&self, operation: &Operation) -> ProviderResult<Operation>;

    /// Current membership of a pool or group, `None` when it does not exist.
    async fn get_membership(
        &self,
        handle: &ResourceHandle,
    ) -> ProviderResult<Option<MembershipSet>> {
        Ok(self.get_resource(handle).await?.map(|r| r.members))
    }
}
