//! In-memory cloud
//!
//! Implements every capability trait over a single mutex-guarded store. The
//! store enforces the same existence, uniqueness and reference rules as the
//! Compute API, so pool tests against it exercise the real ordering
//! constraints. Every successful mutation is appended to a call log.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::types::{
    BackendService, ForwardingRule, HttpHealthCheck, InstanceGroup, NamedPort, TargetHttpProxy,
    UrlMap,
};
use super::{BackendServices, HealthChecks, InstanceGroups, LoadBalancers};
use crate::error::{Error, ResourceKind, Result};

const DEFAULT_ZONE: &str = "default-zone";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloudOp {
    Create,
    Update,
    Delete,
}

/// A mutation applied to the fake store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudCall {
    pub op: CloudOp,
    pub kind: ResourceKind,
    pub name: String,
}

#[derive(Default)]
struct FakeStore {
    instance_groups: BTreeMap<String, InstanceGroup>,
    members: BTreeMap<String, BTreeSet<String>>,
    backend_services: BTreeMap<String, BackendService>,
    health_checks: BTreeMap<String, HttpHealthCheck>,
    url_maps: BTreeMap<String, UrlMap>,
    target_proxies: BTreeMap<String, TargetHttpProxy>,
    forwarding_rules: BTreeMap<String, ForwardingRule>,
    calls: Vec<CloudCall>,
    faults: Vec<(CloudOp, ResourceKind)>,
    next_address: u32,
    next_fingerprint: u64,
}

impl FakeStore {
    /// Log a mutation about to be applied, or fail it if a fault is armed.
    fn record(&mut self, op: CloudOp, kind: ResourceKind, name: &str) -> Result<()> {
        if let Some(pos) = self.faults.iter().position(|f| *f == (op, kind)) {
            self.faults.remove(pos);
            return Err(Error::CloudError(format!(
                "injected failure: {op:?} {kind} {name}"
            )));
        }
        debug!(?op, %kind, name, "fake cloud mutation");
        self.calls.push(CloudCall {
            op,
            kind,
            name: name.to_string(),
        });
        Ok(())
    }

    fn require<T>(
        map: &BTreeMap<String, T>,
        kind: ResourceKind,
        name: &str,
        dependency: (ResourceKind, &str),
    ) -> Result<()> {
        if map.contains_key(dependency.1) {
            Ok(())
        } else {
            Err(Error::MissingDependency {
                kind,
                name: name.to_string(),
                missing: format!("{} {}", dependency.0, dependency.1),
            })
        }
    }

    fn check_backend_service(&self, service: &BackendService) -> Result<()> {
        for hc in &service.health_checks {
            Self::require(
                &self.health_checks,
                ResourceKind::BackendService,
                &service.name,
                (ResourceKind::HealthCheck, hc.as_str()),
            )?;
        }
        for backend in &service.backends {
            Self::require(
                &self.instance_groups,
                ResourceKind::BackendService,
                &service.name,
                (ResourceKind::InstanceGroup, backend.group.as_str()),
            )?;
        }
        Ok(())
    }

    fn check_url_map(&self, url_map: &UrlMap) -> Result<()> {
        for service in url_map.referenced_services() {
            Self::require(
                &self.backend_services,
                ResourceKind::UrlMap,
                &url_map.name,
                (ResourceKind::BackendService, service),
            )?;
        }
        Ok(())
    }

    fn instance_group(&self, name: &str) -> Result<InstanceGroup> {
        let mut group = self
            .instance_groups
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(ResourceKind::InstanceGroup, name))?;
        group.size = self.members.get(name).map_or(0, |m| m.len() as i64);
        Ok(group)
    }

    fn fingerprint(&mut self) -> String {
        self.next_fingerprint += 1;
        format!("fp-{}", self.next_fingerprint)
    }
}

fn in_use(kind: ResourceKind, name: &str, dependent_kind: ResourceKind, dependent: &str) -> Error {
    Error::ResourceInUse {
        kind,
        name: name.to_string(),
        dependent: format!("{dependent_kind} {dependent}"),
    }
}

fn already_exists(kind: ResourceKind, name: &str) -> Error {
    Error::AlreadyExists {
        kind,
        name: name.to_string(),
    }
}

/// In-memory stand-in for the Compute API.
pub struct FakeCloud {
    zone: String,
    store: Mutex<FakeStore>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            zone: DEFAULT_ZONE.to_string(),
            store: Mutex::new(FakeStore::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every mutation applied so far, in order.
    pub fn calls(&self) -> Vec<CloudCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make the next `op` on a resource of `kind` fail with a cloud error.
    pub fn fail_next(&self, op: CloudOp, kind: ResourceKind) {
        self.lock().faults.push((op, kind));
    }

    pub fn backend_service_names(&self) -> Vec<String> {
        self.lock().backend_services.keys().cloned().collect()
    }

    pub fn health_check_names(&self) -> Vec<String> {
        self.lock().health_checks.keys().cloned().collect()
    }

    pub fn url_map_names(&self) -> Vec<String> {
        self.lock().url_maps.keys().cloned().collect()
    }

    pub fn target_proxy_names(&self) -> Vec<String> {
        self.lock().target_proxies.keys().cloned().collect()
    }

    pub fn forwarding_rule_names(&self) -> Vec<String> {
        self.lock().forwarding_rules.keys().cloned().collect()
    }

    pub fn instance_group_names(&self) -> Vec<String> {
        self.lock().instance_groups.keys().cloned().collect()
    }

    pub fn instance_group_members(&self, name: &str) -> Vec<String> {
        self.lock()
            .members
            .get(name)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Backend services referenced by some url map but absent from the store.
    pub fn dangling_backend_references(&self) -> Vec<String> {
        let store = self.lock();
        store
            .url_maps
            .values()
            .flat_map(|um| um.referenced_services())
            .filter(|svc| !store.backend_services.contains_key(*svc))
            .map(str::to_string)
            .collect()
    }
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstanceGroups for FakeCloud {
    async fn get_instance_group(&self, name: &str) -> Result<InstanceGroup> {
        self.lock().instance_group(name)
    }

    async fn create_instance_group(&self, name: &str) -> Result<InstanceGroup> {
        let mut store = self.lock();
        if store.instance_groups.contains_key(name) {
            return Err(already_exists(ResourceKind::InstanceGroup, name));
        }
        store.record(CloudOp::Create, ResourceKind::InstanceGroup, name)?;
        let group = InstanceGroup {
            name: name.to_string(),
            zone: self.zone.clone(),
            named_ports: Vec::new(),
            size: 0,
        };
        store.instance_groups.insert(name.to_string(), group.clone());
        store.members.insert(name.to_string(), BTreeSet::new());
        Ok(group)
    }

    async fn delete_instance_group(&self, name: &str) -> Result<()> {
        let mut store = self.lock();
        if !store.instance_groups.contains_key(name) {
            return Err(Error::not_found(ResourceKind::InstanceGroup, name));
        }
        if let Some(bs) = store
            .backend_services
            .values()
            .find(|bs| bs.backends.iter().any(|b| b.group == name))
        {
            return Err(in_use(
                ResourceKind::InstanceGroup,
                name,
                ResourceKind::BackendService,
                &bs.name,
            ));
        }
        store.record(CloudOp::Delete, ResourceKind::InstanceGroup, name)?;
        store.instance_groups.remove(name);
        store.members.remove(name);
        Ok(())
    }

    async fn list_instances_in_instance_group(&self, name: &str) -> Result<Vec<String>> {
        let store = self.lock();
        store
            .members
            .get(name)
            .map(|m| m.iter().cloned().collect())
            .ok_or_else(|| Error::not_found(ResourceKind::InstanceGroup, name))
    }

    async fn add_instances_to_instance_group(
        &self,
        name: &str,
        instances: &[String],
    ) -> Result<()> {
        let mut store = self.lock();
        let current = store
            .members
            .get(name)
            .ok_or_else(|| Error::not_found(ResourceKind::InstanceGroup, name))?;
        let new: Vec<String> = instances
            .iter()
            .filter(|i| !current.contains(*i))
            .cloned()
            .collect();
        if new.is_empty() {
            return Ok(());
        }
        store.record(CloudOp::Update, ResourceKind::InstanceGroup, name)?;
        if let Some(members) = store.members.get_mut(name) {
            members.extend(new);
        }
        Ok(())
    }

    async fn remove_instances_from_instance_group(
        &self,
        name: &str,
        instances: &[String],
    ) -> Result<()> {
        let mut store = self.lock();
        let current = store
            .members
            .get(name)
            .ok_or_else(|| Error::not_found(ResourceKind::InstanceGroup, name))?;
        if !instances.iter().any(|i| current.contains(i)) {
            return Ok(());
        }
        store.record(CloudOp::Update, ResourceKind::InstanceGroup, name)?;
        if let Some(members) = store.members.get_mut(name) {
            for instance in instances {
                members.remove(instance);
            }
        }
        Ok(())
    }

    async fn add_port_to_instance_group(
        &self,
        group: &InstanceGroup,
        port: i64,
    ) -> Result<NamedPort> {
        let mut store = self.lock();
        let existing = store.instance_group(&group.name)?;
        if let Some(np) = existing.named_port(port) {
            return Ok(np.clone());
        }
        store.record(CloudOp::Update, ResourceKind::InstanceGroup, &group.name)?;
        let named_port = NamedPort {
            name: format!("port{port}"),
            port,
        };
        if let Some(ig) = store.instance_groups.get_mut(&group.name) {
            ig.named_ports.push(named_port.clone());
        }
        Ok(named_port)
    }

    async fn set_named_ports(&self, name: &str, ports: &[NamedPort]) -> Result<()> {
        let mut store = self.lock();
        let existing = store.instance_group(name)?;
        if existing.named_ports == ports {
            return Ok(());
        }
        store.record(CloudOp::Update, ResourceKind::InstanceGroup, name)?;
        if let Some(ig) = store.instance_groups.get_mut(name) {
            ig.named_ports = ports.to_vec();
        }
        Ok(())
    }
}

#[async_trait]
impl BackendServices for FakeCloud {
    async fn get_backend_service(&self, name: &str) -> Result<BackendService> {
        self.lock()
            .backend_services
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(ResourceKind::BackendService, name))
    }

    async fn create_backend_service(&self, service: &BackendService) -> Result<()> {
        let mut store = self.lock();
        if store.backend_services.contains_key(&service.name) {
            return Err(already_exists(ResourceKind::BackendService, &service.name));
        }
        store.check_backend_service(service)?;
        store.record(CloudOp::Create, ResourceKind::BackendService, &service.name)?;
        store
            .backend_services
            .insert(service.name.clone(), service.clone());
        Ok(())
    }

    async fn update_backend_service(&self, service: &BackendService) -> Result<()> {
        let mut store = self.lock();
        if !store.backend_services.contains_key(&service.name) {
            return Err(Error::not_found(ResourceKind::BackendService, &service.name));
        }
        store.check_backend_service(service)?;
        store.record(CloudOp::Update, ResourceKind::BackendService, &service.name)?;
        store
            .backend_services
            .insert(service.name.clone(), service.clone());
        Ok(())
    }

    async fn delete_backend_service(&self, name: &str) -> Result<()> {
        let mut store = self.lock();
        if !store.backend_services.contains_key(name) {
            return Err(Error::not_found(ResourceKind::BackendService, name));
        }
        if let Some(um) = store
            .url_maps
            .values()
            .find(|um| um.referenced_services().contains(name))
        {
            return Err(in_use(
                ResourceKind::BackendService,
                name,
                ResourceKind::UrlMap,
                &um.name,
            ));
        }
        store.record(CloudOp::Delete, ResourceKind::BackendService, name)?;
        store.backend_services.remove(name);
        Ok(())
    }

    async fn list_backend_services(&self) -> Result<Vec<BackendService>> {
        Ok(self.lock().backend_services.values().cloned().collect())
    }
}

#[async_trait]
impl HealthChecks for FakeCloud {
    async fn get_http_health_check(&self, name: &str) -> Result<HttpHealthCheck> {
        self.lock()
            .health_checks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(ResourceKind::HealthCheck, name))
    }

    async fn create_http_health_check(&self, check: &HttpHealthCheck) -> Result<()> {
        let mut store = self.lock();
        if store.health_checks.contains_key(&check.name) {
            return Err(already_exists(ResourceKind::HealthCheck, &check.name));
        }
        store.record(CloudOp::Create, ResourceKind::HealthCheck, &check.name)?;
        store.health_checks.insert(check.name.clone(), check.clone());
        Ok(())
    }

    async fn update_http_health_check(&self, check: &HttpHealthCheck) -> Result<()> {
        let mut store = self.lock();
        if !store.health_checks.contains_key(&check.name) {
            return Err(Error::not_found(ResourceKind::HealthCheck, &check.name));
        }
        store.record(CloudOp::Update, ResourceKind::HealthCheck, &check.name)?;
        store.health_checks.insert(check.name.clone(), check.clone());
        Ok(())
    }

    async fn delete_http_health_check(&self, name: &str) -> Result<()> {
        let mut store = self.lock();
        if !store.health_checks.contains_key(name) {
            return Err(Error::not_found(ResourceKind::HealthCheck, name));
        }
        if let Some(bs) = store
            .backend_services
            .values()
            .find(|bs| bs.health_checks.iter().any(|hc| hc == name))
        {
            return Err(in_use(
                ResourceKind::HealthCheck,
                name,
                ResourceKind::BackendService,
                &bs.name,
            ));
        }
        store.record(CloudOp::Delete, ResourceKind::HealthCheck, name)?;
        store.health_checks.remove(name);
        Ok(())
    }
}

#[async_trait]
impl LoadBalancers for FakeCloud {
    async fn get_global_forwarding_rule(&self, name: &str) -> Result<ForwardingRule> {
        self.lock()
            .forwarding_rules
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(ResourceKind::ForwardingRule, name))
    }

    async fn create_global_forwarding_rule(
        &self,
        proxy: &TargetHttpProxy,
        name: &str,
        port_range: &str,
    ) -> Result<ForwardingRule> {
        let mut store = self.lock();
        if store.forwarding_rules.contains_key(name) {
            return Err(already_exists(ResourceKind::ForwardingRule, name));
        }
        FakeStore::require(
            &store.target_proxies,
            ResourceKind::ForwardingRule,
            name,
            (ResourceKind::TargetProxy, proxy.name.as_str()),
        )?;
        store.record(CloudOp::Create, ResourceKind::ForwardingRule, name)?;
        store.next_address += 1;
        let rule = ForwardingRule {
            name: name.to_string(),
            ip_address: format!("203.0.113.{}", store.next_address),
            ip_protocol: "TCP".to_string(),
            port_range: port_range.to_string(),
            target: proxy.name.clone(),
        };
        store.forwarding_rules.insert(name.to_string(), rule.clone());
        Ok(rule)
    }

    async fn delete_global_forwarding_rule(&self, name: &str) -> Result<()> {
        let mut store = self.lock();
        if !store.forwarding_rules.contains_key(name) {
            return Err(Error::not_found(ResourceKind::ForwardingRule, name));
        }
        store.record(CloudOp::Delete, ResourceKind::ForwardingRule, name)?;
        store.forwarding_rules.remove(name);
        Ok(())
    }

    async fn set_proxy_for_global_forwarding_rule(
        &self,
        rule: &ForwardingRule,
        proxy: &TargetHttpProxy,
    ) -> Result<()> {
        let mut store = self.lock();
        if !store.forwarding_rules.contains_key(&rule.name) {
            return Err(Error::not_found(ResourceKind::ForwardingRule, &rule.name));
        }
        FakeStore::require(
            &store.target_proxies,
            ResourceKind::ForwardingRule,
            &rule.name,
            (ResourceKind::TargetProxy, proxy.name.as_str()),
        )?;
        store.record(CloudOp::Update, ResourceKind::ForwardingRule, &rule.name)?;
        if let Some(fw) = store.forwarding_rules.get_mut(&rule.name) {
            fw.target = proxy.name.clone();
        }
        Ok(())
    }

    async fn get_url_map(&self, name: &str) -> Result<UrlMap> {
        self.lock()
            .url_maps
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(ResourceKind::UrlMap, name))
    }

    async fn create_url_map(&self, backend: &BackendService, name: &str) -> Result<UrlMap> {
        let mut store = self.lock();
        if store.url_maps.contains_key(name) {
            return Err(already_exists(ResourceKind::UrlMap, name));
        }
        let url_map = UrlMap {
            name: name.to_string(),
            default_service: backend.name.clone(),
            host_rules: Vec::new(),
            path_matchers: Vec::new(),
            fingerprint: Some(store.fingerprint()),
        };
        store.check_url_map(&url_map)?;
        store.record(CloudOp::Create, ResourceKind::UrlMap, name)?;
        store.url_maps.insert(name.to_string(), url_map.clone());
        Ok(url_map)
    }

    async fn update_url_map(&self, url_map: &UrlMap) -> Result<UrlMap> {
        let mut store = self.lock();
        if !store.url_maps.contains_key(&url_map.name) {
            return Err(Error::not_found(ResourceKind::UrlMap, &url_map.name));
        }
        store.check_url_map(url_map)?;
        store.record(CloudOp::Update, ResourceKind::UrlMap, &url_map.name)?;
        let updated = UrlMap {
            fingerprint: Some(store.fingerprint()),
            ..url_map.clone()
        };
        store.url_maps.insert(url_map.name.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete_url_map(&self, name: &str) -> Result<()> {
        let mut store = self.lock();
        if !store.url_maps.contains_key(name) {
            return Err(Error::not_found(ResourceKind::UrlMap, name));
        }
        if let Some(tp) = store.target_proxies.values().find(|tp| tp.url_map == name) {
            return Err(in_use(
                ResourceKind::UrlMap,
                name,
                ResourceKind::TargetProxy,
                &tp.name,
            ));
        }
        store.record(CloudOp::Delete, ResourceKind::UrlMap, name)?;
        store.url_maps.remove(name);
        Ok(())
    }

    async fn list_url_maps(&self) -> Result<Vec<UrlMap>> {
        Ok(self.lock().url_maps.values().cloned().collect())
    }

    async fn get_target_http_proxy(&self, name: &str) -> Result<TargetHttpProxy> {
        self.lock()
            .target_proxies
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(ResourceKind::TargetProxy, name))
    }

    async fn create_target_http_proxy(
        &self,
        url_map: &UrlMap,
        name: &str,
    ) -> Result<TargetHttpProxy> {
        let mut store = self.lock();
        if store.target_proxies.contains_key(name) {
            return Err(already_exists(ResourceKind::TargetProxy, name));
        }
        FakeStore::require(
            &store.url_maps,
            ResourceKind::TargetProxy,
            name,
            (ResourceKind::UrlMap, url_map.name.as_str()),
        )?;
        store.record(CloudOp::Create, ResourceKind::TargetProxy, name)?;
        let proxy = TargetHttpProxy {
            name: name.to_string(),
            url_map: url_map.name.clone(),
        };
        store.target_proxies.insert(name.to_string(), proxy.clone());
        Ok(proxy)
    }

    async fn delete_target_http_proxy(&self, name: &str) -> Result<()> {
        let mut store = self.lock();
        if !store.target_proxies.contains_key(name) {
            return Err(Error::not_found(ResourceKind::TargetProxy, name));
        }
        if let Some(fw) = store.forwarding_rules.values().find(|fw| fw.target == name) {
            return Err(in_use(
                ResourceKind::TargetProxy,
                name,
                ResourceKind::ForwardingRule,
                &fw.name,
            ));
        }
        store.record(CloudOp::Delete, ResourceKind::TargetProxy, name)?;
        store.target_proxies.remove(name);
        Ok(())
    }

    async fn set_url_map_for_target_http_proxy(
        &self,
        proxy: &TargetHttpProxy,
        url_map: &UrlMap,
    ) -> Result<()> {
        let mut store = self.lock();
        if !store.target_proxies.contains_key(&proxy.name) {
            return Err(Error::not_found(ResourceKind::TargetProxy, &proxy.name));
        }
        FakeStore::require(
            &store.url_maps,
            ResourceKind::TargetProxy,
            &proxy.name,
            (ResourceKind::UrlMap, url_map.name.as_str()),
        )?;
        store.record(CloudOp::Update, ResourceKind::TargetProxy, &proxy.name)?;
        if let Some(tp) = store.target_proxies.get_mut(&proxy.name) {
            tp.url_map = url_map.name.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::types::Backend;

    fn health_check(name: &str) -> HttpHealthCheck {
        HttpHealthCheck {
            name: name.to_string(),
            port: 80,
            request_path: "/".to_string(),
            ..Default::default()
        }
    }

    fn backend_service(name: &str, hc: &str, group: &str) -> BackendService {
        BackendService {
            name: name.to_string(),
            port: 80,
            port_name: "port80".to_string(),
            protocol: "HTTP".to_string(),
            backends: vec![Backend {
                group: group.to_string(),
            }],
            health_checks: vec![hc.to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rejects_forwarding_rule_for_missing_proxy() {
        let cloud = FakeCloud::new();
        let proxy = TargetHttpProxy {
            name: "tp".into(),
            url_map: "um".into(),
        };
        let err = cloud
            .create_global_forwarding_rule(&proxy, "fw", "80-80")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingDependency { .. }), "{err}");
        assert!(cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn rejects_backend_service_without_health_check() {
        let cloud = FakeCloud::new();
        cloud.create_instance_group("ig").await.unwrap();
        let err = cloud
            .create_backend_service(&backend_service("be", "hc", "ig"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingDependency { .. }));
    }

    #[tokio::test]
    async fn refuses_to_delete_referenced_resources() {
        let cloud = FakeCloud::new();
        cloud.create_instance_group("ig").await.unwrap();
        cloud.create_http_health_check(&health_check("hc")).await.unwrap();
        let be = backend_service("be", "hc", "ig");
        cloud.create_backend_service(&be).await.unwrap();
        let um = cloud.create_url_map(&be, "um").await.unwrap();
        let tp = cloud.create_target_http_proxy(&um, "tp").await.unwrap();
        cloud
            .create_global_forwarding_rule(&tp, "fw", "80-80")
            .await
            .unwrap();

        assert!(cloud.delete_target_http_proxy("tp").await.unwrap_err().is_in_use());
        assert!(cloud.delete_url_map("um").await.unwrap_err().is_in_use());
        assert!(cloud.delete_backend_service("be").await.unwrap_err().is_in_use());
        assert!(cloud.delete_http_health_check("hc").await.unwrap_err().is_in_use());
        assert!(cloud.delete_instance_group("ig").await.unwrap_err().is_in_use());

        cloud.delete_global_forwarding_rule("fw").await.unwrap();
        cloud.delete_target_http_proxy("tp").await.unwrap();
        cloud.delete_url_map("um").await.unwrap();
        cloud.delete_backend_service("be").await.unwrap();
        cloud.delete_http_health_check("hc").await.unwrap();
        cloud.delete_instance_group("ig").await.unwrap();
        assert!(cloud.dangling_backend_references().is_empty());
    }

    #[tokio::test]
    async fn duplicate_create_and_missing_get_are_reported() {
        let cloud = FakeCloud::new();
        cloud.create_http_health_check(&health_check("hc")).await.unwrap();
        let err = cloud
            .create_http_health_check(&health_check("hc"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
        assert!(cloud.get_url_map("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn named_ports_are_added_once() {
        let cloud = FakeCloud::new();
        let ig = cloud.create_instance_group("ig").await.unwrap();
        let first = cloud.add_port_to_instance_group(&ig, 30301).await.unwrap();
        let second = cloud.add_port_to_instance_group(&ig, 30301).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cloud.get_instance_group("ig").await.unwrap().named_ports.len(), 1);
        // create + one port update
        assert_eq!(cloud.calls().len(), 2);
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let cloud = FakeCloud::new();
        cloud.fail_next(CloudOp::Create, ResourceKind::HealthCheck);
        assert!(matches!(
            cloud.create_http_health_check(&health_check("hc")).await,
            Err(Error::CloudError(_))
        ));
        cloud.create_http_health_check(&health_check("hc")).await.unwrap();
        assert_eq!(cloud.health_check_names(), vec!["hc".to_string()]);
    }
}
