//! Cluster object builders shared by the controller tests

use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::{json, Value};

pub fn node(name: &str, ready: bool) -> Node {
    let status = if ready { "True" } else { "False" };
    serde_json::from_value(json!({
        "metadata": { "name": name },
        "status": {
            "conditions": [ { "type": "Ready", "status": status } ]
        }
    }))
    .unwrap()
}

/// A NodePort service exposing `(port, node_port)` pairs.
pub fn service(namespace: &str, name: &str, ports: &[(i32, i32)]) -> Service {
    let ports: Vec<Value> = ports
        .iter()
        .map(|(port, node_port)| {
            json!({ "name": format!("p{port}"), "port": port, "nodePort": node_port })
        })
        .collect();
    serde_json::from_value(json!({
        "metadata": { "name": name, "namespace": namespace },
        "spec": { "type": "NodePort", "ports": ports }
    }))
    .unwrap()
}

/// An Ingress with only a default backend.
pub fn default_ingress(namespace: &str, name: &str, service: &str, port: i32) -> Ingress {
    serde_json::from_value(json!({
        "metadata": { "name": name, "namespace": namespace },
        "spec": {
            "defaultBackend": { "service": { "name": service, "port": { "number": port } } }
        }
    }))
    .unwrap()
}

/// An Ingress with one host rule of `(path, service, port)` entries.
pub fn rule_ingress(
    namespace: &str,
    name: &str,
    host: &str,
    paths: &[(&str, &str, i32)],
) -> Ingress {
    let paths: Vec<Value> = paths
        .iter()
        .map(|(path, service, port)| {
            json!({
                "path": path,
                "pathType": "Prefix",
                "backend": { "service": { "name": service, "port": { "number": port } } }
            })
        })
        .collect();
    serde_json::from_value(json!({
        "metadata": { "name": name, "namespace": namespace },
        "spec": { "rules": [ { "host": host, "http": { "paths": paths } } ] }
    }))
    .unwrap()
}

pub fn with_annotation(mut ingress: Ingress, key: &str, value: &str) -> Ingress {
    ingress
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
    ingress
}
