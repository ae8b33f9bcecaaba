//! Compute Engine v1 REST provider.

mod auth;
mod wire;

pub use auth::TokenSource;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::{ProviderResult, ResourceProvider};
use crate::error::ProviderError;
use crate::model::{
    InstanceDescriptor, InstanceRef, MembershipSet, Operation, Resource, ResourceHandle,
    ResourceKind, ResourceSpec,
};
use wire::{GroupMembers, InstanceList, OperationBody, Region, ResourceBody};

pub const COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Prefix of fully qualified resource URLs such as networks.
const RESOURCE_URL_PREFIX: &str = "https://www.googleapis.com/compute/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn collection(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::TargetPool => "targetPools",
        ResourceKind::InstanceGroup => "instanceGroups",
        ResourceKind::Address => "addresses",
        ResourceKind::Firewall => "firewalls",
        ResourceKind::HealthCheck => "httpHealthChecks",
        ResourceKind::ForwardingRule => "forwardingRules",
    }
}

/// Talks to the Compute Engine API for a single project.
pub struct GceProvider {
    http: Client,
    base_url: String,
    project: String,
    tokens: TokenSource,
}

impl GceProvider {
    pub fn new(project: impl Into<String>, tokens: TokenSource) -> ProviderResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Transport(format!("building http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: COMPUTE_BASE_URL.to_string(),
            project: project.into(),
            tokens,
        })
    }

    /// Point at another endpoint (emulators, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn project_url(&self) -> String {
        format!("{}/projects/{}", self.base_url, self.project)
    }

    fn collection_url(&self, handle: &ResourceHandle) -> String {
        format!(
            "{}/{}/{}",
            self.project_url(),
            handle.scope,
            collection(handle.kind)
        )
    }

    fn resource_url(&self, handle: &ResourceHandle) -> String {
        format!("{}/{}", self.collection_url(handle), handle.name)
    }

    /// Bare network names become full URLs; anything with a slash is kept.
    fn network_url(&self, network: &str) -> String {
        if network.contains('/') {
            network.to_string()
        } else {
            format!(
                "{}/projects/{}/global/networks/{}",
                RESOURCE_URL_PREFIX, self.project, network
            )
        }
    }

    fn body(&self, handle: &ResourceHandle, spec: &ResourceSpec) -> Value {
        wire::resource_body(&handle.name, spec, |n| self.network_url(n))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ProviderResult<T> {
        let token = self.tokens.token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(wire::api_error(status.as_u16(), &body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Transport(format!("decoding response: {}", e)))
    }

    async fn submit(
        &self,
        method: Method,
        url: String,
        handle: &ResourceHandle,
        body: Option<Value>,
    ) -> ProviderResult<Operation> {
        debug!("{} {}", method, url);
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let op: OperationBody = self.send(request).await?;
        Ok(op.into_operation(&handle.scope))
    }

    async fn group_members(&self, handle: &ResourceHandle) -> ProviderResult<MembershipSet> {
        let url = format!("{}/listInstances", self.resource_url(handle));
        let mut members = MembershipSet::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .http
                .post(&url)
                .json(&json!({ "instanceState": "ALL" }));
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: GroupMembers = self.send(request).await?;
            for item in page.items {
                members.insert(InstanceRef::new(item.instance));
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(members),
            }
        }
    }

    fn membership_url(&self, handle: &ResourceHandle, add: bool) -> ProviderResult<String> {
        let verb = match (handle.kind, add) {
            (ResourceKind::TargetPool, true) => "addInstance",
            (ResourceKind::TargetPool, false) => "removeInstance",
            (ResourceKind::InstanceGroup, true) => "addInstances",
            (ResourceKind::InstanceGroup, false) => "removeInstances",
            _ => {
                return Err(ProviderError::Unsupported(format!(
                    "{} does not hold instances",
                    handle
                )));
            }
        };
        Ok(format!("{}/{}", self.resource_url(handle), verb))
    }
}

#[async_trait]
impl ResourceProvider for GceProvider {
    async fn list_zones(&self, region: &str) -> ProviderResult<Vec<String>> {
        let url = format!("{}/regions/{}", self.project_url(), region);
        let region: Region = self.send(self.http.get(url)).await?;
        Ok(region.zone_names())
    }

    async fn list_inventory(&self, zone: &str) -> ProviderResult<Vec<InstanceDescriptor>> {
        let url = format!("{}/zones/{}/instances", self.project_url(), zone);
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.http.get(&url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: InstanceList = self.send(request).await?;
            instances.extend(page.items.into_iter().map(InstanceDescriptor::from));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(instances),
            }
        }
    }

    async fn get_resource(&self, handle: &ResourceHandle) -> ProviderResult<Option<Resource>> {
        let body: ResourceBody = match self.send(self.http.get(self.resource_url(handle))).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let members = if handle.kind == ResourceKind::InstanceGroup {
            Some(self.group_members(handle).await?)
        } else {
            None
        };
        Ok(Some(body.into_resource(handle, members)))
    }

    async fn create_resource(
        &self,
        handle: &ResourceHandle,
        spec: &ResourceSpec,
    ) -> ProviderResult<Operation> {
        let body = self.body(handle, spec);
        self.submit(Method::POST, self.collection_url(handle), handle, Some(body))
            .await
    }

    async fn update_resource(
        &self,
        handle: &ResourceHandle,
        spec: &ResourceSpec,
    ) -> ProviderResult<Operation> {
        if !matches!(handle.kind, ResourceKind::Firewall | ResourceKind::HealthCheck) {
            return Err(ProviderError::Unsupported(format!(
                "{} cannot be updated in place",
                handle
            )));
        }
        let body = self.body(handle, spec);
        self.submit(Method::PUT, self.resource_url(handle), handle, Some(body))
            .await
    }

    async fn delete_resource(&self, handle: &ResourceHandle) -> ProviderResult<Option<Operation>> {
        match self
            .submit(Method::DELETE, self.resource_url(handle), handle, None)
            .await
        {
            Ok(op) => Ok(Some(op)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn add_members(
        &self,
        handle: &ResourceHandle,
        instances: &[InstanceRef],
    ) -> ProviderResult<Operation> {
        let url = self.membership_url(handle, true)?;
        self.submit(Method::POST, url, handle, Some(wire::members_body(instances)))
            .await
    }

    async fn remove_members(
        &self,
        handle: &ResourceHandle,
        instances: &[InstanceRef],
    ) -> ProviderResult<Operation> {
        let url = self.membership_url(handle, false)?;
        self.submit(Method::POST, url, handle, Some(wire::members_body(instances)))
            .await
    }

    async fn poll_operation(&self, operation: &Operation) -> ProviderResult<Operation> {
        let url = format!(
            "{}/{}/operations/{}",
            self.project_url(),
            operation.scope,
            operation.id
        );
        let op: OperationBody = self.send(self.http.get(url)).await?;
        Ok(op.into_operation(&operation.scope))
    }
}
