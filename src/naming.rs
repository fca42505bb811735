//! Cloud resource naming
//!
//! Every cloud resource the controller creates carries the cluster-name tag
//! as a suffix, so that several controllers can share one project and a
//! restarted controller finds its own resources again by name.

const PREFIX: &str = "k8s";
const CLUSTER_SEPARATOR: &str = "--";

const BACKEND_PREFIX: &str = "be";
const INSTANCE_GROUP_PREFIX: &str = "ig";
const URL_MAP_PREFIX: &str = "um";
const TARGET_PROXY_PREFIX: &str = "tp";
const FORWARDING_RULE_PREFIX: &str = "fw";

/// Default cluster-name tag
pub const DEFAULT_CLUSTER_NAME: &str = "foo";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namer {
    cluster_name: String,
}

impl Namer {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    fn scoped(&self, kind: &str, id: &str) -> String {
        if id.is_empty() {
            format!("{PREFIX}-{kind}{CLUSTER_SEPARATOR}{}", self.cluster_name)
        } else {
            format!(
                "{PREFIX}-{kind}-{id}{CLUSTER_SEPARATOR}{}",
                self.cluster_name
            )
        }
    }

    /// Strips `k8s-<kind>-` and `--<cluster>` from `name`, returning the id
    /// in between if the name belongs to this cluster.
    fn parse<'a>(&self, kind: &str, name: &'a str) -> Option<&'a str> {
        let rest = name.strip_prefix(PREFIX)?.strip_prefix('-')?;
        let rest = rest.strip_prefix(kind)?.strip_prefix('-')?;
        let id = rest
            .strip_suffix(self.cluster_name.as_str())?
            .strip_suffix(CLUSTER_SEPARATOR)?;
        (!id.is_empty()).then_some(id)
    }

    /// The cluster-wide instance group holding every node.
    pub fn instance_group(&self) -> String {
        self.scoped(INSTANCE_GROUP_PREFIX, "")
    }

    pub fn backend_service(&self, port: i64) -> String {
        self.scoped(BACKEND_PREFIX, &port.to_string())
    }

    /// Health checks share the name of the backend service they guard.
    pub fn health_check(&self, port: i64) -> String {
        self.backend_service(port)
    }

    /// Named port on the instance group a backend service targets.
    pub fn named_port(&self, port: i64) -> String {
        format!("port{port}")
    }

    /// Node port encoded in a backend service name owned by this cluster.
    pub fn backend_port(&self, name: &str) -> Option<i64> {
        self.parse(BACKEND_PREFIX, name)?.parse().ok()
    }

    /// Load balancer name for an Ingress.
    ///
    /// The namespace length leads the name so that `a-b/c` and `a/b-c` stay
    /// distinct even though both join to `a-b-c`.
    pub fn load_balancer(&self, namespace: &str, ingress: &str) -> String {
        format!("{}-{namespace}-{ingress}", namespace.len())
    }

    pub fn url_map(&self, lb_name: &str) -> String {
        self.scoped(URL_MAP_PREFIX, lb_name)
    }

    pub fn target_proxy(&self, lb_name: &str) -> String {
        self.scoped(TARGET_PROXY_PREFIX, lb_name)
    }

    pub fn forwarding_rule(&self, lb_name: &str) -> String {
        self.scoped(FORWARDING_RULE_PREFIX, lb_name)
    }

    /// Load balancer name encoded in a url map owned by this cluster.
    pub fn load_balancer_from_url_map(&self, url_map: &str) -> Option<String> {
        self.parse(URL_MAP_PREFIX, url_map).map(str::to_string)
    }
}

impl Default for Namer {
    fn default() -> Self {
        Self::new(DEFAULT_CLUSTER_NAME)
    }
}
