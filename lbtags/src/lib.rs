//! lbtags: keeps a network load balancer's backend pool in sync with the
//! instances that carry a given set of tags or labels.
//!
//! Each pass lists the instances of the configured zones, selects the ones
//! matching the [`Selector`], and converges the target pool, optional
//! per-zone instance groups, external address, firewall rule, optional
//! health checks and forwarding rule, in that order.

pub mod config;
pub mod diff;
pub mod error;
pub mod model;
pub mod poller;
pub mod provider;
pub mod reconcile_loop;
pub mod reconciler;
pub mod selector;

pub use config::{LbConfig, PollSettings};
pub use diff::MembershipDiff;
pub use error::{Error, ProviderError, Result};
pub use model::{InstanceDescriptor, InstanceRef, MembershipSet, ResourceHandle};
pub use poller::OperationPoller;
pub use provider::{GceProvider, MemoryProvider, ResourceProvider};
pub use reconcile_loop::{LoopSummary, ReconcileLoop};
pub use reconciler::{LoadBalancerController, PassReport, Reconciler, TeardownReport};
pub use selector::Selector;
