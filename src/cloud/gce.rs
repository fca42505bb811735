//! Compute API client
//!
//! Talks to the Compute v1 REST API. Mutations return long-running
//! operations which are polled until done, so every trait call returns only
//! once the cloud has applied (or rejected) the change.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::types::{
    Backend, BackendService, ForwardingRule, HttpHealthCheck, InstanceGroup, NamedPort,
    PathMatcher, PathRule, TargetHttpProxy, UrlMap,
};
use super::{BackendServices, HealthChecks, InstanceGroups, LoadBalancers};
use crate::config::GceSettings;
use crate::error::{Error, ResourceKind, Result};

/// Compute v1 endpoint
pub const COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(1);
const OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

const IN_USE_REASON: &str = "resourceInUseByAnotherResource";
const IN_USE_CODE: &str = "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE";
const NOT_FOUND_CODE: &str = "RESOURCE_NOT_FOUND";
const ALREADY_EXISTS_CODE: &str = "RESOURCE_ALREADY_EXISTS";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    zone: Option<String>,
    #[serde(default)]
    error: Option<OperationErrors>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationErrors {
    #[serde(default)]
    errors: Vec<OperationError>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct InstanceReference {
    instance: String,
}

/// Last path segment of a resource URL; plain names pass through.
pub fn resource_name(link: &str) -> String {
    link.rsplit('/').next().unwrap_or(link).to_string()
}

pub struct GceCloud {
    client: Client,
    base_url: String,
    project: String,
    zone: String,
    token: String,
    poll_interval: Duration,
}

impl GceCloud {
    pub fn new(settings: &GceSettings, token: impl Into<String>) -> Result<Self> {
        if settings.project.is_empty() || settings.zone.is_empty() {
            return Err(Error::ConfigError(
                "GCE project and zone must be set".to_string(),
            ));
        }
        let token = token.into();
        if token.is_empty() {
            return Err(Error::ConfigError("GCE access token is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: COMPUTE_BASE_URL.to_string(),
            project: settings.project.clone(),
            zone: settings.zone.clone(),
            token,
            poll_interval: OPERATION_POLL_INTERVAL,
        })
    }

    /// Point the client at another endpoint (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn project_url(&self) -> String {
        format!("{}/projects/{}", self.base_url, self.project)
    }

    fn global_url(&self, collection: &str) -> String {
        format!("{}/global/{collection}", self.project_url())
    }

    fn zonal_url(&self, collection: &str) -> String {
        format!("{}/zones/{}/{collection}", self.project_url(), self.zone)
    }

    fn instance_group_link(&self, name: &str) -> String {
        format!("{}/{name}", self.zonal_url("instanceGroups"))
    }

    fn instance_link(&self, name: &str) -> String {
        format!("{}/{name}", self.zonal_url("instances"))
    }

    fn backend_service_link(&self, name: &str) -> String {
        format!("{}/{name}", self.global_url("backendServices"))
    }

    fn health_check_link(&self, name: &str) -> String {
        format!("{}/{name}", self.global_url("httpHealthChecks"))
    }

    fn url_map_link(&self, name: &str) -> String {
        format!("{}/{name}", self.global_url("urlMaps"))
    }

    fn target_proxy_link(&self, name: &str) -> String {
        format!("{}/{name}", self.global_url("targetHttpProxies"))
    }

    /// Map a failed response to the controller's error kinds.
    async fn check(resp: Response, kind: ResourceKind, name: &str) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => Error::not_found(kind, name),
            StatusCode::CONFLICT => Error::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            _ if body.contains(IN_USE_REASON) => Error::ResourceInUse {
                kind,
                name: name.to_string(),
                dependent: body,
            },
            _ => Error::CloudError(format!("{kind} {name}: HTTP {status}: {body}")),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        kind: ResourceKind,
        name: &str,
    ) -> Result<T> {
        debug!("GET {}", url);
        let resp = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let resp = Self::check(resp, kind, name).await?;
        Ok(resp.json().await?)
    }

    async fn list<T: DeserializeOwned>(&self, url: String, kind: ResourceKind) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self.client.get(&url).bearer_auth(&self.token);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }
            let resp = Self::check(req.send().await?, kind, "").await?;
            let page: ListResponse<T> = resp.json().await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(items),
            }
        }
    }

    /// Send a mutating request and wait for its operation to finish.
    async fn mutate(&self, req: RequestBuilder, kind: ResourceKind, name: &str) -> Result<()> {
        let resp = req.bearer_auth(&self.token).send().await?;
        let op: Operation = Self::check(resp, kind, name).await?.json().await?;
        self.wait_for(op, kind, name).await
    }

    async fn wait_for(&self, mut op: Operation, kind: ResourceKind, name: &str) -> Result<()> {
        let deadline = Instant::now() + OPERATION_TIMEOUT;
        while op.status != "DONE" {
            if Instant::now() >= deadline {
                return Err(Error::CloudError(format!(
                    "timed out waiting for operation {} on {kind} {name}",
                    op.name
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
            let url = match &op.zone {
                Some(zone) => format!(
                    "{}/zones/{}/operations/{}",
                    self.project_url(),
                    resource_name(zone),
                    op.name
                ),
                None => format!("{}/{}", self.global_url("operations"), op.name),
            };
            op = self.get_json(url, kind, name).await?;
        }
        match op.error.and_then(|e| e.errors.into_iter().next()) {
            None => Ok(()),
            Some(err) => Err(match err.code.as_str() {
                NOT_FOUND_CODE => Error::not_found(kind, name),
                ALREADY_EXISTS_CODE => Error::AlreadyExists {
                    kind,
                    name: name.to_string(),
                },
                IN_USE_CODE => Error::ResourceInUse {
                    kind,
                    name: name.to_string(),
                    dependent: err.message,
                },
                _ => Error::CloudError(format!("{kind} {name}: {}: {}", err.code, err.message)),
            }),
        }
    }

    fn linked_backend_service(&self, service: &BackendService) -> BackendService {
        BackendService {
            backends: service
                .backends
                .iter()
                .map(|b| Backend {
                    group: self.instance_group_link(&b.group),
                })
                .collect(),
            health_checks: service
                .health_checks
                .iter()
                .map(|hc| self.health_check_link(hc))
                .collect(),
            ..service.clone()
        }
    }

    fn linked_url_map(&self, url_map: &UrlMap) -> UrlMap {
        UrlMap {
            default_service: self.backend_service_link(&url_map.default_service),
            path_matchers: url_map
                .path_matchers
                .iter()
                .map(|pm| PathMatcher {
                    name: pm.name.clone(),
                    default_service: self.backend_service_link(&pm.default_service),
                    path_rules: pm
                        .path_rules
                        .iter()
                        .map(|rule| PathRule {
                            paths: rule.paths.clone(),
                            service: self.backend_service_link(&rule.service),
                        })
                        .collect(),
                })
                .collect(),
            ..url_map.clone()
        }
    }
}

fn unlinked_instance_group(mut group: InstanceGroup) -> InstanceGroup {
    group.zone = resource_name(&group.zone);
    group
}

fn unlinked_backend_service(mut service: BackendService) -> BackendService {
    for backend in &mut service.backends {
        backend.group = resource_name(&backend.group);
    }
    service.health_checks = service
        .health_checks
        .iter()
        .map(|hc| resource_name(hc))
        .collect();
    service
}

fn unlinked_url_map(mut url_map: UrlMap) -> UrlMap {
    url_map.default_service = resource_name(&url_map.default_service);
    for matcher in &mut url_map.path_matchers {
        matcher.default_service = resource_name(&matcher.default_service);
        for rule in &mut matcher.path_rules {
            rule.service = resource_name(&rule.service);
        }
    }
    url_map
}

#[async_trait]
impl InstanceGroups for GceCloud {
    async fn get_instance_group(&self, name: &str) -> Result<InstanceGroup> {
        let url = self.instance_group_link(name);
        let group = self
            .get_json(url, ResourceKind::InstanceGroup, name)
            .await?;
        Ok(unlinked_instance_group(group))
    }

    #[instrument(skip(self))]
    async fn create_instance_group(&self, name: &str) -> Result<InstanceGroup> {
        let req = self
            .client
            .post(self.zonal_url("instanceGroups"))
            .json(&json!({ "name": name }));
        self.mutate(req, ResourceKind::InstanceGroup, name).await?;
        self.get_instance_group(name).await
    }

    #[instrument(skip(self))]
    async fn delete_instance_group(&self, name: &str) -> Result<()> {
        let req = self.client.delete(self.instance_group_link(name));
        self.mutate(req, ResourceKind::InstanceGroup, name).await
    }

    async fn list_instances_in_instance_group(&self, name: &str) -> Result<Vec<String>> {
        let url = format!("{}/listInstances", self.instance_group_link(name));
        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .post(&url)
                .bearer_auth(&self.token)
                .json(&json!({ "instanceState": "ALL" }));
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }
            let resp = Self::check(req.send().await?, ResourceKind::InstanceGroup, name).await?;
            let page: ListResponse<InstanceReference> = resp.json().await?;
            instances.extend(page.items.iter().map(|i| resource_name(&i.instance)));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(instances),
            }
        }
    }

    #[instrument(skip(self))]
    async fn add_instances_to_instance_group(
        &self,
        name: &str,
        instances: &[String],
    ) -> Result<()> {
        let refs: Vec<InstanceReference> = instances
            .iter()
            .map(|i| InstanceReference {
                instance: self.instance_link(i),
            })
            .collect();
        let req = self
            .client
            .post(format!("{}/addInstances", self.instance_group_link(name)))
            .json(&json!({ "instances": refs }));
        self.mutate(req, ResourceKind::InstanceGroup, name).await
    }

    #[instrument(skip(self))]
    async fn remove_instances_from_instance_group(
        &self,
        name: &str,
        instances: &[String],
    ) -> Result<()> {
        let refs: Vec<InstanceReference> = instances
            .iter()
            .map(|i| InstanceReference {
                instance: self.instance_link(i),
            })
            .collect();
        let req = self
            .client
            .post(format!("{}/removeInstances", self.instance_group_link(name)))
            .json(&json!({ "instances": refs }));
        self.mutate(req, ResourceKind::InstanceGroup, name).await
    }

    async fn add_port_to_instance_group(
        &self,
        group: &InstanceGroup,
        port: i64,
    ) -> Result<NamedPort> {
        let current = self.get_instance_group(&group.name).await?;
        if let Some(np) = current.named_port(port) {
            return Ok(np.clone());
        }
        let named_port = NamedPort {
            name: format!("port{port}"),
            port,
        };
        let mut ports = current.named_ports;
        ports.push(named_port.clone());
        self.set_named_ports(&group.name, &ports).await?;
        Ok(named_port)
    }

    #[instrument(skip(self, ports))]
    async fn set_named_ports(&self, name: &str, ports: &[NamedPort]) -> Result<()> {
        let req = self
            .client
            .post(format!("{}/setNamedPorts", self.instance_group_link(name)))
            .json(&json!({ "namedPorts": ports }));
        self.mutate(req, ResourceKind::InstanceGroup, name).await
    }
}

#[async_trait]
impl BackendServices for GceCloud {
    async fn get_backend_service(&self, name: &str) -> Result<BackendService> {
        let service = self
            .get_json(
                self.backend_service_link(name),
                ResourceKind::BackendService,
                name,
            )
            .await?;
        Ok(unlinked_backend_service(service))
    }

    #[instrument(skip(self, service), fields(name = %service.name))]
    async fn create_backend_service(&self, service: &BackendService) -> Result<()> {
        let req = self
            .client
            .post(self.global_url("backendServices"))
            .json(&self.linked_backend_service(service));
        self.mutate(req, ResourceKind::BackendService, &service.name)
            .await
    }

    #[instrument(skip(self, service), fields(name = %service.name))]
    async fn update_backend_service(&self, service: &BackendService) -> Result<()> {
        let req = self
            .client
            .put(self.backend_service_link(&service.name))
            .json(&self.linked_backend_service(service));
        self.mutate(req, ResourceKind::BackendService, &service.name)
            .await
    }

    #[instrument(skip(self))]
    async fn delete_backend_service(&self, name: &str) -> Result<()> {
        let req = self.client.delete(self.backend_service_link(name));
        self.mutate(req, ResourceKind::BackendService, name).await
    }

    async fn list_backend_services(&self) -> Result<Vec<BackendService>> {
        let services: Vec<BackendService> = self
            .list(
                self.global_url("backendServices"),
                ResourceKind::BackendService,
            )
            .await?;
        Ok(services.into_iter().map(unlinked_backend_service).collect())
    }
}

#[async_trait]
impl HealthChecks for GceCloud {
    async fn get_http_health_check(&self, name: &str) -> Result<HttpHealthCheck> {
        self.get_json(
            self.health_check_link(name),
            ResourceKind::HealthCheck,
            name,
        )
        .await
    }

    #[instrument(skip(self, check), fields(name = %check.name))]
    async fn create_http_health_check(&self, check: &HttpHealthCheck) -> Result<()> {
        let req = self
            .client
            .post(self.global_url("httpHealthChecks"))
            .json(check);
        self.mutate(req, ResourceKind::HealthCheck, &check.name)
            .await
    }

    #[instrument(skip(self, check), fields(name = %check.name))]
    async fn update_http_health_check(&self, check: &HttpHealthCheck) -> Result<()> {
        let req = self
            .client
            .put(self.health_check_link(&check.name))
            .json(check);
        self.mutate(req, ResourceKind::HealthCheck, &check.name)
            .await
    }

    #[instrument(skip(self))]
    async fn delete_http_health_check(&self, name: &str) -> Result<()> {
        let req = self.client.delete(self.health_check_link(name));
        self.mutate(req, ResourceKind::HealthCheck, name).await
    }
}

#[async_trait]
impl LoadBalancers for GceCloud {
    async fn get_global_forwarding_rule(&self, name: &str) -> Result<ForwardingRule> {
        let url = format!("{}/{name}", self.global_url("forwardingRules"));
        let mut rule: ForwardingRule = self
            .get_json(url, ResourceKind::ForwardingRule, name)
            .await?;
        rule.target = resource_name(&rule.target);
        Ok(rule)
    }

    #[instrument(skip(self, proxy), fields(proxy = %proxy.name))]
    async fn create_global_forwarding_rule(
        &self,
        proxy: &TargetHttpProxy,
        name: &str,
        port_range: &str,
    ) -> Result<ForwardingRule> {
        let req = self
            .client
            .post(self.global_url("forwardingRules"))
            .json(&json!({
                "name": name,
                "IPProtocol": "TCP",
                "portRange": port_range,
                "target": self.target_proxy_link(&proxy.name),
            }));
        self.mutate(req, ResourceKind::ForwardingRule, name).await?;
        self.get_global_forwarding_rule(name).await
    }

    #[instrument(skip(self))]
    async fn delete_global_forwarding_rule(&self, name: &str) -> Result<()> {
        let url = format!("{}/{name}", self.global_url("forwardingRules"));
        self.mutate(self.client.delete(url), ResourceKind::ForwardingRule, name)
            .await
    }

    #[instrument(skip(self, rule, proxy), fields(rule = %rule.name, proxy = %proxy.name))]
    async fn set_proxy_for_global_forwarding_rule(
        &self,
        rule: &ForwardingRule,
        proxy: &TargetHttpProxy,
    ) -> Result<()> {
        let url = format!(
            "{}/{}/setTarget",
            self.global_url("forwardingRules"),
            rule.name
        );
        let req = self
            .client
            .post(url)
            .json(&json!({ "target": self.target_proxy_link(&proxy.name) }));
        self.mutate(req, ResourceKind::ForwardingRule, &rule.name)
            .await
    }

    async fn get_url_map(&self, name: &str) -> Result<UrlMap> {
        let url_map = self
            .get_json(self.url_map_link(name), ResourceKind::UrlMap, name)
            .await?;
        Ok(unlinked_url_map(url_map))
    }

    #[instrument(skip(self, backend), fields(backend = %backend.name))]
    async fn create_url_map(&self, backend: &BackendService, name: &str) -> Result<UrlMap> {
        let req = self.client.post(self.global_url("urlMaps")).json(&json!({
            "name": name,
            "defaultService": self.backend_service_link(&backend.name),
        }));
        self.mutate(req, ResourceKind::UrlMap, name).await?;
        self.get_url_map(name).await
    }

    #[instrument(skip(self, url_map), fields(name = %url_map.name))]
    async fn update_url_map(&self, url_map: &UrlMap) -> Result<UrlMap> {
        let req = self
            .client
            .put(self.url_map_link(&url_map.name))
            .json(&self.linked_url_map(url_map));
        self.mutate(req, ResourceKind::UrlMap, &url_map.name).await?;
        self.get_url_map(&url_map.name).await
    }

    #[instrument(skip(self))]
    async fn delete_url_map(&self, name: &str) -> Result<()> {
        let req = self.client.delete(self.url_map_link(name));
        self.mutate(req, ResourceKind::UrlMap, name).await
    }

    async fn list_url_maps(&self) -> Result<Vec<UrlMap>> {
        let maps: Vec<UrlMap> = self
            .list(self.global_url("urlMaps"), ResourceKind::UrlMap)
            .await?;
        Ok(maps.into_iter().map(unlinked_url_map).collect())
    }

    async fn get_target_http_proxy(&self, name: &str) -> Result<TargetHttpProxy> {
        let mut proxy: TargetHttpProxy = self
            .get_json(
                self.target_proxy_link(name),
                ResourceKind::TargetProxy,
                name,
            )
            .await?;
        proxy.url_map = resource_name(&proxy.url_map);
        Ok(proxy)
    }

    #[instrument(skip(self, url_map), fields(url_map = %url_map.name))]
    async fn create_target_http_proxy(
        &self,
        url_map: &UrlMap,
        name: &str,
    ) -> Result<TargetHttpProxy> {
        let req = self
            .client
            .post(self.global_url("targetHttpProxies"))
            .json(&json!({
                "name": name,
                "urlMap": self.url_map_link(&url_map.name),
            }));
        self.mutate(req, ResourceKind::TargetProxy, name).await?;
        self.get_target_http_proxy(name).await
    }

    #[instrument(skip(self))]
    async fn delete_target_http_proxy(&self, name: &str) -> Result<()> {
        let req = self.client.delete(self.target_proxy_link(name));
        self.mutate(req, ResourceKind::TargetProxy, name).await
    }

    #[instrument(skip(self, proxy, url_map), fields(proxy = %proxy.name, url_map = %url_map.name))]
    async fn set_url_map_for_target_http_proxy(
        &self,
        proxy: &TargetHttpProxy,
        url_map: &UrlMap,
    ) -> Result<()> {
        let url = format!(
            "{}/targetHttpProxies/{}/setUrlMap",
            self.project_url(),
            proxy.name
        );
        let req = self
            .client
            .post(url)
            .json(&json!({ "urlMap": self.url_map_link(&url_map.name) }));
        self.mutate(req, ResourceKind::TargetProxy, &proxy.name)
            .await
    }
}
