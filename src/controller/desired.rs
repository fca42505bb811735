//! Desired state
//!
//! Turns the listed Ingress, Service and Node objects into the key sets the
//! pools are synced against: node names, backend node ports and one
//! [`L7Request`] per Ingress.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::naming::Namer;
use crate::pools::l7::{DEFAULT_HOST, DEFAULT_PATH};
use crate::pools::L7Request;

/// Annotation selecting which controller serves an Ingress
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
/// Ingress class served by this controller
pub const GCE_INGRESS_CLASS: &str = "gce";

/// Objects listed from the API server for one sync.
#[derive(Clone, Debug, Default)]
pub struct ClusterObjects {
    pub ingresses: Vec<Ingress>,
    pub services: Vec<Service>,
    pub nodes: Vec<Node>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesiredState {
    /// Ready node names, sorted
    pub nodes: Vec<String>,
    /// Node ports of every referenced Service plus the default backend, sorted
    pub ports: Vec<i64>,
    pub load_balancers: Vec<L7Request>,
}

impl DesiredState {
    pub fn compute(objects: &ClusterObjects, namer: &Namer, default_backend_port: i64) -> Self {
        let nodes: BTreeSet<String> = objects
            .nodes
            .iter()
            .filter(|n| node_is_ready(n))
            .map(|n| n.name_any())
            .collect();

        let mut ports = BTreeSet::from([default_backend_port]);
        let mut load_balancers = Vec::new();
        for ingress in objects.ingresses.iter().filter(|i| is_gce_ingress(i)) {
            let request = l7_request(ingress, &objects.services, namer);
            ports.extend(request.ports());
            load_balancers.push(request);
        }

        Self {
            nodes: nodes.into_iter().collect(),
            ports: ports.into_iter().collect(),
            load_balancers,
        }
    }

    pub fn load_balancer_names(&self) -> Vec<String> {
        self.load_balancers.iter().map(|r| r.name.clone()).collect()
    }
}

/// Ingresses without a class, or of class `gce`, are ours.
pub fn is_gce_ingress(ingress: &Ingress) -> bool {
    if let Some(class) = ingress.annotations().get(INGRESS_CLASS_ANNOTATION) {
        return class == GCE_INGRESS_CLASS;
    }
    match ingress
        .spec
        .as_ref()
        .and_then(|s| s.ingress_class_name.as_deref())
    {
        Some(class) => class == GCE_INGRESS_CLASS,
        None => true,
    }
}

pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

fn l7_request(ingress: &Ingress, services: &[Service], namer: &Namer) -> L7Request {
    let namespace = ingress.namespace().unwrap_or_else(|| "default".to_string());
    let mut request = L7Request::new(namer.load_balancer(&namespace, &ingress.name_any()));
    let Some(spec) = ingress.spec.as_ref() else {
        return request;
    };

    if let Some(backend) = spec.default_backend.as_ref() {
        if let Some(port) = resolve_node_port(backend, &namespace, services) {
            request = request.with_default_backend(port);
        }
    }

    for rule in spec.rules.iter().flatten() {
        let host = rule.host.as_deref().unwrap_or(DEFAULT_HOST);
        let Some(http) = rule.http.as_ref() else {
            continue;
        };
        for path in &http.paths {
            let route = match path.path.as_deref() {
                None | Some("") => DEFAULT_PATH,
                Some(p) => p,
            };
            match resolve_node_port(&path.backend, &namespace, services) {
                Some(port) => request = request.with_route(host, route, port),
                None => warn!(
                    "Ingress {}/{}: backend for {}{} has no node port, skipping",
                    namespace,
                    ingress.name_any(),
                    host,
                    route
                ),
            }
        }
    }
    debug!("Ingress {}/{} -> {:?}", namespace, ingress.name_any(), request);
    request
}

/// Node port of the Service port an Ingress backend points at.
pub fn resolve_node_port(
    backend: &IngressBackend,
    namespace: &str,
    services: &[Service],
) -> Option<i64> {
    let target = backend.service.as_ref()?;
    let wanted = target.port.as_ref()?;
    let service = services
        .iter()
        .find(|s| s.name_any() == target.name && s.namespace().as_deref() == Some(namespace))?;
    service
        .spec
        .as_ref()?
        .ports
        .iter()
        .flatten()
        .find(|p| match (&wanted.name, wanted.number) {
            (_, Some(number)) => p.port == number,
            (Some(name), None) => p.name.as_deref() == Some(name.as_str()),
            (None, None) => false,
        })
        .and_then(|p| p.node_port)
        .map(i64::from)
}
