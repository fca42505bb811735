//! Load balancer pool
//!
//! Drives each L7 through its pipeline:
//!
//! ```text
//! Absent -> BackendsReady -> UrlMapReady -> ProxyReady -> Ready
//! Ready -> ForwardingRuleGone -> ProxyGone -> Absent
//! ```
//!
//! Every step checks the cloud before mutating, so a pass that failed
//! halfway re-enters at the first step whose resource is missing or stale.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::backends::BackendPool;
use super::l7::{build_url_map, L7Record, L7Request, L7Stage, HTTP_PORT_RANGE, L7};
use crate::cloud::{BackendService, ForwardingRule, LoadBalancers, TargetHttpProxy, UrlMap};
use crate::error::{Error, ResourceKind, Result};
use crate::naming::Namer;
use crate::storage::Snapshotter;

pub struct LoadBalancerPool {
    cloud: Arc<dyn LoadBalancers>,
    backends: Arc<BackendPool>,
    namer: Namer,
    default_backend_port: i64,
    delete_all_on_quit: bool,
    snapshotter: Snapshotter<String, L7Record>,
}

impl LoadBalancerPool {
    pub fn new(
        cloud: Arc<dyn LoadBalancers>,
        backends: Arc<BackendPool>,
        namer: Namer,
        default_backend_port: i64,
        delete_all_on_quit: bool,
    ) -> Self {
        Self {
            cloud,
            backends,
            namer,
            default_backend_port,
            delete_all_on_quit,
            snapshotter: Snapshotter::new(),
        }
    }

    /// Build an L7 that sends all traffic to the default backend.
    pub async fn add(&self, name: &str) -> Result<L7> {
        self.ensure(&L7Request::new(name)).await
    }

    /// Create or repair the L7 described by `request`.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn ensure(&self, request: &L7Request) -> Result<L7> {
        let mut record = self
            .snapshotter
            .get(&request.name)
            .unwrap_or_else(|| L7Record::new(&request.name));
        let before = record.stage;
        let result = self.walk(request, &mut record).await;
        if record.stage != before {
            record.last_transition = Some(Utc::now());
        }
        match result {
            Ok(l7) => {
                record.ip_address = Some(l7.ip_address.clone());
                record.last_error = None;
                self.snapshotter.add(request.name.clone(), record);
                Ok(l7)
            }
            Err(e) => {
                warn!("L7 {} stopped at {}: {}", request.name, record.stage, e);
                record.last_error = Some(e.to_string());
                self.snapshotter.add(request.name.clone(), record);
                Err(e)
            }
        }
    }

    fn advance(&self, record: &mut L7Record, stage: L7Stage) {
        debug!("L7 {} reached {}", record.name, stage);
        record.stage = stage;
        self.snapshotter.add(record.name.clone(), record.clone());
    }

    /// Committed default backend, created on first use.
    async fn default_backend(&self) -> Result<BackendService> {
        match self.backends.committed(self.default_backend_port) {
            Some(service) => Ok(service),
            None => self.backends.add(self.default_backend_port).await,
        }
    }

    async fn walk(&self, request: &L7Request, record: &mut L7Record) -> Result<L7> {
        let cluster_default = self.default_backend().await?;
        let resolve = |port: i64| self.backends.committed(port).map(|svc| svc.name);
        if let Some(port) = request.ports().find(|port| resolve(*port).is_none()) {
            return Err(Error::MissingDependency {
                kind: ResourceKind::UrlMap,
                name: self.namer.url_map(&request.name),
                missing: format!("backend service for port {port}"),
            });
        }
        let default = match request.default_port {
            Some(port) => self.backends.committed(port).ok_or_else(|| Error::MissingDependency {
                kind: ResourceKind::UrlMap,
                name: self.namer.url_map(&request.name),
                missing: format!("backend service for port {port}"),
            })?,
            None => cluster_default,
        };
        self.advance(record, L7Stage::BackendsReady);

        let url_map = self.ensure_url_map(request, &default, resolve).await?;
        self.advance(record, L7Stage::UrlMapReady);

        let proxy = self.ensure_target_proxy(&request.name, &url_map).await?;
        self.advance(record, L7Stage::ProxyReady);

        let rule = self.ensure_forwarding_rule(&request.name, &proxy).await?;
        record.ip_address = Some(rule.ip_address.clone());
        self.advance(record, L7Stage::Ready);

        Ok(L7 {
            name: request.name.clone(),
            url_map: url_map.name,
            target_proxy: proxy.name,
            forwarding_rule: rule.name,
            ip_address: rule.ip_address,
            default_backend: default.name,
        })
    }

    async fn ensure_url_map<F>(
        &self,
        request: &L7Request,
        default: &BackendService,
        resolve: F,
    ) -> Result<UrlMap>
    where
        F: Fn(i64) -> Option<String>,
    {
        let name = self.namer.url_map(&request.name);
        let current = match self.cloud.get_url_map(&name).await {
            Ok(url_map) => url_map,
            Err(e) if e.is_not_found() => {
                info!("Creating url map {}", name);
                self.cloud.create_url_map(default, &name).await?
            }
            Err(e) => return Err(e),
        };
        let desired = build_url_map(&current, &default.name, &request.routes, resolve)?;
        if desired.same_routes(&current) {
            return Ok(current);
        }
        info!("Updating url map {}", name);
        self.cloud.update_url_map(&desired).await
    }

    async fn ensure_target_proxy(&self, lb: &str, url_map: &UrlMap) -> Result<TargetHttpProxy> {
        let name = self.namer.target_proxy(lb);
        match self.cloud.get_target_http_proxy(&name).await {
            Ok(proxy) if proxy.url_map == url_map.name => Ok(proxy),
            Ok(proxy) => {
                info!("Relinking target proxy {} to {}", name, url_map.name);
                self.cloud
                    .set_url_map_for_target_http_proxy(&proxy, url_map)
                    .await?;
                Ok(TargetHttpProxy {
                    url_map: url_map.name.clone(),
                    ..proxy
                })
            }
            Err(e) if e.is_not_found() => {
                info!("Creating target proxy {}", name);
                self.cloud.create_target_http_proxy(url_map, &name).await
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_forwarding_rule(
        &self,
        lb: &str,
        proxy: &TargetHttpProxy,
    ) -> Result<ForwardingRule> {
        let name = self.namer.forwarding_rule(lb);
        match self.cloud.get_global_forwarding_rule(&name).await {
            Ok(rule) if rule.target == proxy.name => Ok(rule),
            Ok(rule) => {
                info!("Relinking forwarding rule {} to {}", name, proxy.name);
                self.cloud
                    .set_proxy_for_global_forwarding_rule(&rule, proxy)
                    .await?;
                Ok(ForwardingRule {
                    target: proxy.name.clone(),
                    ..rule
                })
            }
            Err(e) if e.is_not_found() => {
                info!("Creating forwarding rule {}", name);
                self.cloud
                    .create_global_forwarding_rule(proxy, &name, HTTP_PORT_RANGE)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Create or update every requested L7. Nothing is deleted.
    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn sync(&self, requests: &[L7Request]) -> Result<()> {
        let mut errors = Vec::new();
        for request in requests {
            if let Err(e) = self.ensure(request).await {
                errors.push(e);
            }
        }
        Error::from_errors(errors)
    }

    /// Tear down every owned L7 whose name is not in `names`.
    #[instrument(skip(self, names), fields(keep = names.len()))]
    pub async fn gc(&self, names: &[String]) -> Result<()> {
        let desired: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let mut errors = Vec::new();

        let mut owned: BTreeSet<String> = self.snapshotter.keys().into_iter().collect();
        match self.cloud.list_url_maps().await {
            Ok(maps) => owned.extend(
                maps.iter()
                    .filter_map(|um| self.namer.load_balancer_from_url_map(&um.name)),
            ),
            Err(e) => errors.push(e),
        }

        for name in owned.iter().filter(|n| !desired.contains(n.as_str())) {
            if let Err(e) = self.delete(name).await {
                errors.push(e);
            }
        }
        Error::from_errors(errors)
    }

    /// Tear down one L7: forwarding rule, target proxy, then url map.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut record = self
            .snapshotter
            .get(&name.to_string())
            .unwrap_or_else(|| L7Record::new(name));
        info!("Deleting L7 {}", name);
        let before = record.stage;
        let result = self.teardown(name, &mut record).await;
        if record.stage != before {
            record.last_transition = Some(Utc::now());
        }
        match result {
            Ok(()) => {
                self.snapshotter.delete(&name.to_string());
                Ok(())
            }
            Err(e) => {
                warn!("L7 {} teardown stopped at {}: {}", name, record.stage, e);
                record.last_error = Some(e.to_string());
                self.snapshotter.add(name.to_string(), record);
                Err(e)
            }
        }
    }

    async fn teardown(&self, name: &str, record: &mut L7Record) -> Result<()> {
        ignore_not_found(
            self.cloud
                .delete_global_forwarding_rule(&self.namer.forwarding_rule(name))
                .await,
        )?;
        record.ip_address = None;
        self.advance(record, L7Stage::ForwardingRuleGone);

        ignore_not_found(
            self.cloud
                .delete_target_http_proxy(&self.namer.target_proxy(name))
                .await,
        )?;
        self.advance(record, L7Stage::ProxyGone);

        ignore_not_found(self.cloud.delete_url_map(&self.namer.url_map(name)).await)
    }

    /// Compose the L7 from the cloud.
    ///
    /// Not found if any piece is missing, a missing dependency if the pieces
    /// exist but do not point at each other.
    pub async fn get(&self, name: &str) -> Result<L7> {
        let url_map = self.cloud.get_url_map(&self.namer.url_map(name)).await?;
        let proxy = self
            .cloud
            .get_target_http_proxy(&self.namer.target_proxy(name))
            .await?;
        let rule = self
            .cloud
            .get_global_forwarding_rule(&self.namer.forwarding_rule(name))
            .await?;
        if proxy.url_map != url_map.name {
            return Err(Error::MissingDependency {
                kind: ResourceKind::TargetProxy,
                name: proxy.name,
                missing: format!("link to url map {}", url_map.name),
            });
        }
        if rule.target != proxy.name {
            return Err(Error::MissingDependency {
                kind: ResourceKind::ForwardingRule,
                name: rule.name,
                missing: format!("link to target proxy {}", proxy.name),
            });
        }
        Ok(L7 {
            name: name.to_string(),
            url_map: url_map.name,
            target_proxy: proxy.name,
            forwarding_rule: rule.name,
            ip_address: rule.ip_address,
            default_backend: url_map.default_service,
        })
    }

    /// Cached pipeline state of every known L7.
    pub fn statuses(&self) -> Vec<L7Record> {
        self.snapshotter.snapshot().into_values().collect()
    }

    /// Delete all owned L7s when configured to, otherwise leave them for
    /// the next controller to adopt.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.delete_all_on_quit {
            info!("Leaving load balancers in place for the next controller");
            return Ok(());
        }
        self.gc(&[]).await
    }
}

fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
