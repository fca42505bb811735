//! Cloud resource model
//!
//! Field names follow the Compute API JSON shape. References between
//! resources (`health_checks`, `url_map`, `target`, ...) hold resource names;
//! the live client converts them to and from resource URLs.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedPort {
    pub name: String,
    pub port: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceGroup {
    pub name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub named_ports: Vec<NamedPort>,
    #[serde(default)]
    pub size: i64,
}

impl InstanceGroup {
    pub fn named_port(&self, port: i64) -> Option<&NamedPort> {
        self.named_ports.iter().find(|np| np.port == port)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// Instance group name
    pub group: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendService {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub port_name: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub backends: Vec<Backend>,
    /// Health check names
    #[serde(default)]
    pub health_checks: Vec<String>,
}

impl BackendService {
    /// True when the fields the controller manages differ from `other`.
    pub fn differs_from(&self, other: &BackendService) -> bool {
        self.port != other.port
            || self.port_name != other.port_name
            || self.protocol != other.protocol
            || self.backends != other.backends
            || self.health_checks != other.health_checks
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpHealthCheck {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub port: i64,
    #[serde(default)]
    pub request_path: String,
    #[serde(default)]
    pub check_interval_sec: i64,
    #[serde(default)]
    pub timeout_sec: i64,
    #[serde(default)]
    pub healthy_threshold: i64,
    #[serde(default)]
    pub unhealthy_threshold: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRule {
    pub paths: Vec<String>,
    /// Backend service name
    pub service: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMatcher {
    pub name: String,
    pub default_service: String,
    #[serde(default)]
    pub path_rules: Vec<PathRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRule {
    pub hosts: Vec<String>,
    pub path_matcher: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlMap {
    pub name: String,
    /// Backend service name used when no host rule matches
    pub default_service: String,
    #[serde(default)]
    pub host_rules: Vec<HostRule>,
    #[serde(default)]
    pub path_matchers: Vec<PathMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl UrlMap {
    /// Every backend service name this url map routes to.
    pub fn referenced_services(&self) -> BTreeSet<&str> {
        let mut services = BTreeSet::new();
        services.insert(self.default_service.as_str());
        for matcher in &self.path_matchers {
            services.insert(matcher.default_service.as_str());
            for rule in &matcher.path_rules {
                services.insert(rule.service.as_str());
            }
        }
        services
    }

    /// Compare routing content, ignoring server-assigned fields.
    pub fn same_routes(&self, other: &UrlMap) -> bool {
        self.default_service == other.default_service
            && self.host_rules == other.host_rules
            && self.path_matchers == other.path_matchers
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetHttpProxy {
    pub name: String,
    /// Url map name
    pub url_map: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingRule {
    pub name: String,
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
    #[serde(rename = "IPProtocol", default)]
    pub ip_protocol: String,
    #[serde(default)]
    pub port_range: String,
    /// Target proxy name
    #[serde(default)]
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_map_lists_every_referenced_service() {
        let um = UrlMap {
            name: "um".into(),
            default_service: "be-default".into(),
            host_rules: vec![HostRule {
                hosts: vec!["foo.example.com".into()],
                path_matcher: "host1".into(),
            }],
            path_matchers: vec![PathMatcher {
                name: "host1".into(),
                default_service: "be-default".into(),
                path_rules: vec![PathRule {
                    paths: vec!["/api".into()],
                    service: "be-api".into(),
                }],
            }],
            fingerprint: None,
        };
        let refs: Vec<_> = um.referenced_services().into_iter().collect();
        assert_eq!(refs, vec!["be-api", "be-default"]);
    }

    #[test]
    fn forwarding_rule_uses_compute_field_names() {
        let fw: ForwardingRule = serde_json::from_value(serde_json::json!({
            "name": "fw",
            "IPAddress": "203.0.113.7",
            "portRange": "80-80",
            "target": "tp"
        }))
        .unwrap();
        assert_eq!(fw.ip_address, "203.0.113.7");
        assert_eq!(fw.port_range, "80-80");
    }
}
