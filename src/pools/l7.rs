//! L7 load balancer model
//!
//! An L7 is the url map, target proxy and forwarding rule serving one
//! Ingress. They are built bottom-up and torn down top-down; [`L7Stage`]
//! records how far either walk got so a failed pass resumes cleanly.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cloud::{HostRule, PathMatcher, PathRule, UrlMap};
use crate::error::{Error, ResourceKind, Result};

/// Host used for rules without a host.
pub const DEFAULT_HOST: &str = "*";
/// Path used for rules without a path.
pub const DEFAULT_PATH: &str = "/*";
/// Port range of every forwarding rule.
pub const HTTP_PORT_RANGE: &str = "80-80";

/// host -> path -> node port
pub type RouteTable = BTreeMap<String, BTreeMap<String, i64>>;

/// Desired state of one L7.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct L7Request {
    pub name: String,
    pub routes: RouteTable,
    /// Node port serving unmatched traffic; the cluster default backend
    /// when unset.
    pub default_port: Option<i64>,
}

impl L7Request {
    /// An L7 sending everything to the default backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: RouteTable::new(),
            default_port: None,
        }
    }

    pub fn with_default_backend(mut self, port: i64) -> Self {
        self.default_port = Some(port);
        self
    }

    pub fn with_route(mut self, host: &str, path: &str, port: i64) -> Self {
        self.routes
            .entry(host.to_string())
            .or_default()
            .insert(path.to_string(), port);
        self
    }

    /// Node ports this L7 routes to, excluding the cluster default backend.
    pub fn ports(&self) -> impl Iterator<Item = i64> + '_ {
        self.default_port
            .into_iter()
            .chain(self.routes.values().flat_map(|paths| paths.values().copied()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum L7Stage {
    Absent,
    BackendsReady,
    UrlMapReady,
    ProxyReady,
    Ready,
    ForwardingRuleGone,
    ProxyGone,
}

impl fmt::Display for L7Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Cached progress of one L7, readable outside the reconcile loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct L7Record {
    pub name: String,
    pub stage: L7Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// When `stage` last changed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition: Option<DateTime<Utc>>,
}

impl L7Record {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: L7Stage::Absent,
            ip_address: None,
            last_error: None,
            last_transition: None,
        }
    }
}

/// A fully linked L7 load balancer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct L7 {
    pub name: String,
    pub url_map: String,
    pub target_proxy: String,
    pub forwarding_rule: String,
    pub ip_address: String,
    pub default_backend: String,
}

/// Rebuild `current` so it routes `routes`, resolving node ports to backend
/// service names with `resolve`.
///
/// Every port must resolve: a url map never points at a backend service
/// that has not been committed.
pub fn build_url_map<F>(
    current: &UrlMap,
    default_service: &str,
    routes: &RouteTable,
    resolve: F,
) -> Result<UrlMap>
where
    F: Fn(i64) -> Option<String>,
{
    let mut host_rules = Vec::with_capacity(routes.len());
    let mut path_matchers = Vec::with_capacity(routes.len());

    for (i, (host, paths)) in routes.iter().enumerate() {
        let matcher = format!("host{}", i + 1);
        let mut path_rules = Vec::with_capacity(paths.len());
        for (path, port) in paths {
            let service = resolve(*port).ok_or_else(|| Error::MissingDependency {
                kind: ResourceKind::UrlMap,
                name: current.name.clone(),
                missing: format!("backend service for port {port}"),
            })?;
            let path = if path.is_empty() { DEFAULT_PATH } else { path };
            path_rules.push(PathRule {
                paths: vec![path.to_string()],
                service,
            });
        }
        let host = if host.is_empty() { DEFAULT_HOST } else { host };
        host_rules.push(HostRule {
            hosts: vec![host.to_string()],
            path_matcher: matcher.clone(),
        });
        path_matchers.push(PathMatcher {
            name: matcher,
            default_service: default_service.to_string(),
            path_rules,
        });
    }

    Ok(UrlMap {
        name: current.name.clone(),
        default_service: default_service.to_string(),
        host_rules,
        path_matchers,
        fingerprint: current.fingerprint.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(port: i64) -> Option<String> {
        (port != 9999).then(|| format!("be-{port}"))
    }

    #[test]
    fn builds_one_matcher_per_host() {
        let current = UrlMap {
            name: "um".into(),
            default_service: "be-default".into(),
            fingerprint: Some("fp-1".into()),
            ..Default::default()
        };
        let req = L7Request::new("lb")
            .with_route("", "/api", 30400)
            .with_route("foo.example.com", "", 30401)
            .with_route("foo.example.com", "/static", 30402);

        let um = build_url_map(&current, "be-default", &req.routes, resolve).unwrap();
        assert_eq!(um.fingerprint.as_deref(), Some("fp-1"));
        assert_eq!(um.host_rules.len(), 2);
        assert_eq!(um.host_rules[0].hosts, vec!["*"]);
        assert_eq!(um.host_rules[1].path_matcher, "host2");
        assert_eq!(um.path_matchers[1].path_rules[0].paths, vec!["/*"]);
        assert_eq!(um.path_matchers[1].path_rules[1].service, "be-30402");
        assert!(!um.same_routes(&current));
    }

    #[test]
    fn unresolved_port_is_a_missing_dependency() {
        let current = UrlMap {
            name: "um".into(),
            ..Default::default()
        };
        let req = L7Request::new("lb").with_route("", "/", 9999);
        let err = build_url_map(&current, "be-default", &req.routes, resolve).unwrap_err();
        assert!(matches!(err, Error::MissingDependency { .. }));
    }
}
