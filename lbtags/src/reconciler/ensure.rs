//! Generic get-or-create / update-or-create / delete-if-present helpers.
//!
//! Every resource kind goes through these, so NotFound and Conflict are
//! absorbed in one place. Every submitted operation is polled to completion
//! before the helper returns.

use tracing::{debug, info};

use crate::error::{ProviderError, Result};
use crate::model::{Resource, ResourceHandle, ResourceSpec};
use crate::poller::OperationPoller;
use crate::provider::ResourceProvider;

/// What an ensure call had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Already present and not drifted.
    Unchanged,
    Created,
    Updated,
    /// Create lost a race to another writer; the existing resource is used.
    Adopted,
}

impl Outcome {
    pub fn mutated(self) -> bool {
        matches!(self, Outcome::Created | Outcome::Updated)
    }
}

/// Result of [`ensure_resource`]: the outcome plus the resource as it now exists.
#[derive(Debug, Clone)]
pub struct Ensured {
    pub outcome: Outcome,
    pub resource: Resource,
}

/// Make sure `handle` exists.
///
/// An absent resource is created. A present one is updated in place only when
/// `drifted` says its observed state differs; pass `|_| false` for
/// presence-only convergence.
pub async fn ensure_resource<P, F>(
    provider: &P,
    poller: &OperationPoller,
    handle: &ResourceHandle,
    spec: &ResourceSpec,
    drifted: F,
) -> Result<Ensured>
where
    P: ResourceProvider + ?Sized,
    F: Fn(&Resource) -> bool + Send,
{
    let outcome = match provider.get_resource(handle).await? {
        Some(existing) if !drifted(&existing) => {
            debug!("{} already exists", handle);
            return Ok(Ensured {
                outcome: Outcome::Unchanged,
                resource: existing,
            });
        }
        Some(_) => update_or_create(provider, poller, handle, spec).await?,
        None => create_or_adopt(provider, poller, handle, spec).await?,
    };

    let resource = provider.get_resource(handle).await?.ok_or_else(|| {
        ProviderError::NotFound(format!("{} not visible after {:?}", handle, outcome))
    })?;
    Ok(Ensured { outcome, resource })
}

/// Update in place, falling back to create when the resource is gone.
pub async fn update_or_create<P>(
    provider: &P,
    poller: &OperationPoller,
    handle: &ResourceHandle,
    spec: &ResourceSpec,
) -> Result<Outcome>
where
    P: ResourceProvider + ?Sized,
{
    match provider.update_resource(handle, spec).await {
        Ok(op) => {
            poller.wait(provider, op).await?;
            info!("Updated {}", handle);
            Ok(Outcome::Updated)
        }
        Err(e) if e.is_not_found() => {
            debug!("{} vanished before update, creating", handle);
            create_or_adopt(provider, poller, handle, spec).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Create, treating "already exists" as success.
pub async fn create_or_adopt<P>(
    provider: &P,
    poller: &OperationPoller,
    handle: &ResourceHandle,
    spec: &ResourceSpec,
) -> Result<Outcome>
where
    P: ResourceProvider + ?Sized,
{
    match provider.create_resource(handle, spec).await {
        Ok(op) => {
            poller.wait(provider, op).await?;
            info!("Created {}", handle);
            Ok(Outcome::Created)
        }
        Err(e) if e.is_conflict() => {
            info!("{} was created concurrently, using it", handle);
            Ok(Outcome::Adopted)
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete, treating "already absent" as success. Returns whether anything was deleted.
pub async fn remove_resource<P>(
    provider: &P,
    poller: &OperationPoller,
    handle: &ResourceHandle,
) -> Result<bool>
where
    P: ResourceProvider + ?Sized,
{
    match provider.delete_resource(handle).await {
        Ok(Some(op)) => {
            poller.wait(provider, op).await?;
            info!("Deleted {}", handle);
            Ok(true)
        }
        Ok(None) => {
            debug!("{} already absent", handle);
            Ok(false)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Drift predicate comparing the observed spec with `desired`.
///
/// Providers that do not report a spec are treated as converged.
pub fn spec_drifted(desired: &ResourceSpec) -> impl Fn(&Resource) -> bool + Send + '_ {
    move |resource: &Resource| {
        resource
            .spec
            .as_ref()
            .is_some_and(|observed| !desired.matches(observed))
    }
}
