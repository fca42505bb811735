//! Cloud capability interfaces
//!
//! Pools talk to the cloud only through these traits. Each trait has two
//! implementations with identical observable behavior: [`GceCloud`] against
//! the Compute API and [`FakeCloud`] in memory. The one to use is chosen once
//! at startup when building [`CloudInterfaces`].

pub mod fake;
pub mod gce;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

pub use fake::{CloudCall, CloudOp, FakeCloud};
pub use gce::GceCloud;
pub use types::{
    Backend, BackendService, ForwardingRule, HostRule, HttpHealthCheck, InstanceGroup, NamedPort,
    PathMatcher, PathRule, TargetHttpProxy, UrlMap,
};

/// Zonal instance groups and their membership.
#[async_trait]
pub trait InstanceGroups: Send + Sync {
    async fn get_instance_group(&self, name: &str) -> Result<InstanceGroup>;
    async fn create_instance_group(&self, name: &str) -> Result<InstanceGroup>;
    async fn delete_instance_group(&self, name: &str) -> Result<()>;

    async fn list_instances_in_instance_group(&self, name: &str) -> Result<Vec<String>>;
    async fn add_instances_to_instance_group(&self, name: &str, instances: &[String])
        -> Result<()>;
    async fn remove_instances_from_instance_group(
        &self,
        name: &str,
        instances: &[String],
    ) -> Result<()>;

    /// Adds a named port for `port`; an existing one is returned unchanged.
    async fn add_port_to_instance_group(
        &self,
        group: &InstanceGroup,
        port: i64,
    ) -> Result<NamedPort>;
    /// Replaces the full named port list of the group.
    async fn set_named_ports(&self, name: &str, ports: &[NamedPort]) -> Result<()>;
}

/// Global backend services.
#[async_trait]
pub trait BackendServices: Send + Sync {
    async fn get_backend_service(&self, name: &str) -> Result<BackendService>;
    async fn create_backend_service(&self, service: &BackendService) -> Result<()>;
    async fn update_backend_service(&self, service: &BackendService) -> Result<()>;
    async fn delete_backend_service(&self, name: &str) -> Result<()>;
    async fn list_backend_services(&self) -> Result<Vec<BackendService>>;
}

/// Legacy HTTP health checks.
#[async_trait]
pub trait HealthChecks: Send + Sync {
    async fn get_http_health_check(&self, name: &str) -> Result<HttpHealthCheck>;
    async fn create_http_health_check(&self, check: &HttpHealthCheck) -> Result<()>;
    async fn update_http_health_check(&self, check: &HttpHealthCheck) -> Result<()>;
    async fn delete_http_health_check(&self, name: &str) -> Result<()>;
}

/// The resources making up an L7 load balancer. None of them is usable on
/// its own, so they share one interface rather than one pool each.
#[async_trait]
pub trait LoadBalancers: Send + Sync {
    // Forwarding rules
    async fn get_global_forwarding_rule(&self, name: &str) -> Result<ForwardingRule>;
    async fn create_global_forwarding_rule(
        &self,
        proxy: &TargetHttpProxy,
        name: &str,
        port_range: &str,
    ) -> Result<ForwardingRule>;
    async fn delete_global_forwarding_rule(&self, name: &str) -> Result<()>;
    async fn set_proxy_for_global_forwarding_rule(
        &self,
        rule: &ForwardingRule,
        proxy: &TargetHttpProxy,
    ) -> Result<()>;

    // Url maps
    async fn get_url_map(&self, name: &str) -> Result<UrlMap>;
    async fn create_url_map(&self, backend: &BackendService, name: &str) -> Result<UrlMap>;
    async fn update_url_map(&self, url_map: &UrlMap) -> Result<UrlMap>;
    async fn delete_url_map(&self, name: &str) -> Result<()>;
    async fn list_url_maps(&self) -> Result<Vec<UrlMap>>;

    // Target proxies
    async fn get_target_http_proxy(&self, name: &str) -> Result<TargetHttpProxy>;
    async fn create_target_http_proxy(
        &self,
        url_map: &UrlMap,
        name: &str,
    ) -> Result<TargetHttpProxy>;
    async fn delete_target_http_proxy(&self, name: &str) -> Result<()>;
    async fn set_url_map_for_target_http_proxy(
        &self,
        proxy: &TargetHttpProxy,
        url_map: &UrlMap,
    ) -> Result<()>;
}

/// One implementation of every capability, shared by all pools.
#[derive(Clone)]
pub struct CloudInterfaces {
    pub instance_groups: Arc<dyn InstanceGroups>,
    pub backend_services: Arc<dyn BackendServices>,
    pub health_checks: Arc<dyn HealthChecks>,
    pub load_balancers: Arc<dyn LoadBalancers>,
}

impl CloudInterfaces {
    pub fn fake(cloud: &Arc<FakeCloud>) -> Self {
        Self {
            instance_groups: cloud.clone(),
            backend_services: cloud.clone(),
            health_checks: cloud.clone(),
            load_balancers: cloud.clone(),
        }
    }

    pub fn gce(cloud: Arc<GceCloud>) -> Self {
        Self {
            instance_groups: cloud.clone(),
            backend_services: cloud.clone(),
            health_checks: cloud.clone(),
            load_balancers: cloud,
        }
    }
}
