//! Convergence of the load balancer's resources.
//!
//! The controller compares desired state (selector + config) with actual state
//! (from the provider) and submits the mutations needed to converge, in a fixed
//! dependency order.

pub mod controller;
pub mod ensure;
pub mod pool;

pub use controller::{LoadBalancerController, PassReport, TeardownReport};

use async_trait::async_trait;

use crate::error::Result;

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Desired configuration.
    type Spec: Send + Sync;
    /// What a successful pass reports back.
    type Status: Send;

    /// Compare desired vs actual state and take action.
    async fn reconcile(&self, spec: &Self::Spec) -> Result<Self::Status>;

    /// Remove everything `reconcile` created.
    async fn finalize(&self, spec: &Self::Spec) -> Result<()>;
}
