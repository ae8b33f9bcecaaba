//! Compute Engine v1 JSON wire types and conversions.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ProviderError;
use crate::model::{
    InstanceDescriptor, InstanceRef, MembershipSet, Operation, OperationStatus, Resource,
    ResourceHandle, ResourceKind, ResourceSpec, Scope,
};

#[derive(Debug, Deserialize)]
pub struct Region {
    /// Zone URLs.
    #[serde(default)]
    pub zones: Vec<String>,
}

impl Region {
    pub fn zone_names(&self) -> Vec<String> {
        self.zones.iter().map(|z| basename(z).to_string()).collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceList {
    #[serde(default)]
    pub items: Vec<Instance>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    pub self_link: String,
    #[serde(default)]
    pub zone: String,
    pub tags: Option<Tags>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct Tags {
    #[serde(default)]
    pub items: Vec<String>,
}

impl From<Instance> for InstanceDescriptor {
    fn from(instance: Instance) -> Self {
        InstanceDescriptor {
            instance: InstanceRef::new(instance.self_link),
            zone: basename(&instance.zone).to_string(),
            name: instance.name,
            tags: instance.tags.map(|t| t.items).unwrap_or_default().into_iter().collect(),
            labels: instance.labels,
        }
    }
}

/// Fields of every managed resource kind that convergence looks at.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBody {
    pub self_link: String,
    /// Target pool members.
    #[serde(default)]
    pub instances: Vec<String>,
    /// Allocated IP of an address.
    pub address: Option<String>,
    pub network: Option<String>,
    #[serde(default)]
    pub allowed: Vec<Allowed>,
    #[serde(default)]
    pub target_tags: Vec<String>,
    pub port: Option<u16>,
    pub request_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Allowed {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    #[serde(default)]
    pub ports: Vec<String>,
}

impl ResourceBody {
    pub fn into_resource(
        self,
        handle: &ResourceHandle,
        members: Option<MembershipSet>,
    ) -> Resource {
        let spec = self.observed_spec(handle.kind);
        let members = members.unwrap_or_else(|| {
            self.instances
                .iter()
                .map(|i| InstanceRef::new(i.as_str()))
                .collect()
        });
        Resource {
            handle: handle.clone(),
            self_link: self.self_link,
            address: self.address,
            members,
            spec,
        }
    }

    fn observed_spec(&self, kind: ResourceKind) -> Option<ResourceSpec> {
        match kind {
            // Port ranges ("8000-8010") do not parse and so read as drift.
            ResourceKind::Firewall => Some(ResourceSpec::Firewall {
                network: self.network.clone().unwrap_or_default(),
                ports: self
                    .allowed
                    .iter()
                    .filter(|a| a.ip_protocol.eq_ignore_ascii_case("tcp"))
                    .flat_map(|a| a.ports.iter())
                    .filter_map(|p| p.parse().ok())
                    .collect(),
                target_tags: self.target_tags.clone(),
            }),
            ResourceKind::HealthCheck => Some(ResourceSpec::HealthCheck {
                port: self.port.unwrap_or(80),
                request_path: self.request_path.clone().unwrap_or_else(|| "/".to_string()),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembers {
    #[serde(default)]
    pub items: Vec<GroupMember>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupMember {
    pub instance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationBody {
    pub name: String,
    pub status: String,
    pub error: Option<OperationErrors>,
    pub http_error_status_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct OperationErrors {
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

#[derive(Debug, Deserialize)]
pub struct OperationErrorItem {
    pub code: Option<String>,
    pub message: Option<String>,
}

impl OperationBody {
    pub fn into_operation(self, scope: &Scope) -> Operation {
        let status = match self.status.as_str() {
            "DONE" => OperationStatus::Done,
            "RUNNING" => OperationStatus::Running,
            _ => OperationStatus::Pending,
        };
        let errors = self
            .error
            .map(|e| e.errors)
            .unwrap_or_default()
            .into_iter()
            .map(|e| {
                e.message
                    .or(e.code)
                    .unwrap_or_else(|| "unknown error".to_string())
            })
            .collect();
        Operation {
            id: self.name,
            scope: scope.clone(),
            status,
            errors,
            http_status: self.http_error_status_code,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Map a non-2xx response to a provider error.
pub fn api_error(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    match status {
        404 => ProviderError::NotFound(message),
        409 => ProviderError::Conflict(message),
        _ => ProviderError::Api { status, message },
    }
}

/// Insert/update body for `spec`.
pub fn resource_body(
    name: &str,
    spec: &ResourceSpec,
    network_url: impl Fn(&str) -> String,
) -> Value {
    match spec {
        ResourceSpec::TargetPool { instances } => json!({
            "name": name,
            "instances": instances.iter().map(InstanceRef::as_str).collect::<Vec<_>>(),
        }),
        ResourceSpec::InstanceGroup { network } => json!({
            "name": name,
            "network": network_url(network),
        }),
        ResourceSpec::Address => json!({ "name": name }),
        ResourceSpec::Firewall {
            network,
            ports,
            target_tags,
        } => json!({
            "name": name,
            "network": network_url(network),
            "allowed": [{
                "IPProtocol": "tcp",
                "ports": ports.iter().map(u16::to_string).collect::<Vec<_>>(),
            }],
            "sourceRanges": ["0.0.0.0/0"],
            "targetTags": target_tags,
        }),
        ResourceSpec::HealthCheck { port, request_path } => json!({
            "name": name,
            "port": port,
            "requestPath": request_path,
        }),
        ResourceSpec::ForwardingRule {
            ip_address,
            target,
            port_range,
        } => json!({
            "name": name,
            "IPAddress": ip_address,
            "IPProtocol": "TCP",
            "portRange": port_range,
            "target": target,
        }),
    }
}

/// Body of addInstance(s) / removeInstance(s).
pub fn members_body(instances: &[InstanceRef]) -> Value {
    json!({
        "instances": instances
            .iter()
            .map(|i| json!({ "instance": i.as_str() }))
            .collect::<Vec<_>>(),
    })
}

fn basename(s: &str) -> &str {
    s.rsplit('/').next().unwrap_or(s)
}
