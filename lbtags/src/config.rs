//! Load balancer configuration threaded through every convergence pass.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::selector::Selector;

/// Request path requested by the legacy HTTP health checks.
pub const HEALTH_CHECK_PATH: &str = "/";

/// Everything a pass needs to know about the load balancer it manages.
#[derive(Debug, Clone)]
pub struct LbConfig {
    /// Name shared by the target pool, firewall rule and forwarding rule.
    pub name: String,
    pub project: String,
    pub network: String,
    pub region: String,
    /// Fully qualified zones whose instances are candidates. Empty means
    /// every zone of the region, looked up on each pass.
    pub zones: Vec<String>,
    pub ports: Vec<u16>,
    /// Name of the reserved external address.
    pub address_name: String,
    pub selector: Selector,
    /// Also maintain one unmanaged instance group per zone.
    pub instance_groups: bool,
    /// Maintain one legacy HTTP health check per port.
    pub health_check: bool,
    /// Release the external address on teardown.
    pub release_address: bool,
}

impl LbConfig {
    /// Reject configurations no pass could converge.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Misuse("load balancer name must not be empty".into()));
        }
        if self.region.is_empty() {
            return Err(Error::Misuse("region must not be empty".into()));
        }
        if self.ports.is_empty() {
            return Err(Error::Misuse("at least one port is required".into()));
        }
        if self.address_name.is_empty() {
            return Err(Error::Misuse("address name must not be empty".into()));
        }
        Ok(())
    }

    /// Forwarding rule port range spanning every configured port.
    pub fn port_range(&self) -> String {
        let min = self.ports.iter().min().copied().unwrap_or_default();
        let max = self.ports.iter().max().copied().unwrap_or_default();
        format!("{}-{}", min, max)
    }

    /// Tags the firewall rule targets. Label selectors leave it untargeted.
    pub fn firewall_target_tags(&self) -> Vec<String> {
        match &self.selector {
            Selector::Tags(tags) => tags.iter().cloned().collect(),
            Selector::Labels(_) => Vec::new(),
        }
    }

    /// The firewall rule has no target tags and so opens the ports on every
    /// instance in the network.
    pub fn firewall_is_untargeted(&self) -> bool {
        self.firewall_target_tags().is_empty()
    }

    pub fn health_check_name(&self, port: u16) -> String {
        format!("{}-{}", self.name, port)
    }
}

/// Operation poller timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Expand zone shorthands (`a`) into full zone names (`us-central1-a`).
///
/// Entries that already contain a dash are taken as full zone names.
pub fn expand_zones(region: &str, zones: &[String]) -> Vec<String> {
    zones
        .iter()
        .map(|z| z.trim())
        .filter(|z| !z.is_empty())
        .map(|z| {
            if z.contains('-') {
                z.to_string()
            } else {
                format!("{}-{}", region, z)
            }
        })
        .collect()
}
