//! End-to-end tests driving the full controller against the in-memory cloud.

use std::sync::Arc;

use glbc::cloud::{CloudInterfaces, FakeCloud};
use glbc::config::{ControllerConfig, RunMode};
use glbc::controller::{ClusterManager, ClusterObjects, LoadBalancerController, StaticLister};
use glbc::naming::Namer;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde_json::json;

const DEFAULT_PORT: i64 = 30300;

fn node(name: &str) -> Node {
    serde_json::from_value(json!({
        "metadata": { "name": name },
        "status": { "conditions": [ { "type": "Ready", "status": "True" } ] }
    }))
    .unwrap()
}

fn service(name: &str, node_port: i32) -> Service {
    serde_json::from_value(json!({
        "metadata": { "name": name, "namespace": "default" },
        "spec": { "type": "NodePort", "ports": [ { "port": 80, "nodePort": node_port } ] }
    }))
    .unwrap()
}

fn ingress(name: &str, host: &str, service: &str) -> Ingress {
    serde_json::from_value(json!({
        "metadata": { "name": name, "namespace": "default" },
        "spec": {
            "rules": [ {
                "host": host,
                "http": { "paths": [ {
                    "path": "/",
                    "pathType": "Prefix",
                    "backend": { "service": { "name": service, "port": { "number": 80 } } }
                } ] }
            } ]
        }
    }))
    .unwrap()
}

fn controller(
    cloud: &Arc<FakeCloud>,
    lister: Arc<StaticLister>,
    delete_all_on_quit: bool,
) -> Arc<LoadBalancerController> {
    let config = Arc::new(ControllerConfig {
        run_mode: RunMode::OutOfCluster,
        cluster_name: "e2e".to_string(),
        delete_all_on_quit,
        ..ControllerConfig::new(DEFAULT_PORT)
    });
    let cluster = Arc::new(ClusterManager::new(config, CloudInterfaces::fake(cloud)).unwrap());
    Arc::new(LoadBalancerController::new(cluster, lister))
}

fn two_sites() -> ClusterObjects {
    ClusterObjects {
        ingresses: vec![
            ingress("shop", "shop.example.com", "shop"),
            ingress("blog", "blog.example.com", "blog"),
        ],
        services: vec![service("shop", 30401), service("blog", 30402)],
        nodes: vec![node("n1"), node("n2"), node("n3")],
    }
}

#[tokio::test]
async fn ingresses_converge_to_load_balancers() {
    let cloud = Arc::new(FakeCloud::new());
    let lister = Arc::new(StaticLister::new(two_sites()));
    let lbc = controller(&cloud, lister.clone(), false);

    lbc.sync().await.unwrap();

    let namer = Namer::new("e2e");
    assert_eq!(cloud.forwarding_rule_names().len(), 2);
    assert_eq!(
        cloud.backend_service_names(),
        vec![
            namer.backend_service(DEFAULT_PORT),
            namer.backend_service(30401),
            namer.backend_service(30402),
        ]
    );
    assert_eq!(
        cloud.instance_group_members(&namer.instance_group()),
        vec!["n1", "n2", "n3"]
    );
    let shop = lbc.cluster().l7_pool.get(&namer.load_balancer("default", "shop")).await.unwrap();
    assert_eq!(shop.default_backend, namer.backend_service(DEFAULT_PORT));
    assert!(cloud.dangling_backend_references().is_empty());

    // One site goes away and a node leaves.
    lister.set(ClusterObjects {
        ingresses: vec![ingress("shop", "shop.example.com", "shop")],
        services: vec![service("shop", 30401)],
        nodes: vec![node("n1"), node("n2")],
    });
    lbc.sync().await.unwrap();

    assert_eq!(
        cloud.forwarding_rule_names(),
        vec![namer.forwarding_rule(&namer.load_balancer("default", "shop"))]
    );
    assert_eq!(
        cloud.backend_service_names(),
        vec![
            namer.backend_service(DEFAULT_PORT),
            namer.backend_service(30401),
        ]
    );
    assert_eq!(
        cloud.instance_group_members(&namer.instance_group()),
        vec!["n1", "n2"]
    );
    assert!(cloud.dangling_backend_references().is_empty());
}

#[tokio::test]
async fn restarted_controller_adopts_and_collects_leftovers() {
    let cloud = Arc::new(FakeCloud::new());
    let first = controller(&cloud, Arc::new(StaticLister::new(two_sites())), false);
    first.sync().await.unwrap();
    first.stop().await.unwrap();
    assert_eq!(cloud.forwarding_rule_names().len(), 2);

    // The replacement starts with empty caches and a cluster without ingresses.
    let second = controller(&cloud, Arc::new(StaticLister::default()), false);
    second.sync().await.unwrap();

    assert!(cloud.forwarding_rule_names().is_empty());
    assert!(cloud.url_map_names().is_empty());
    assert_eq!(
        cloud.backend_service_names(),
        vec![Namer::new("e2e").backend_service(DEFAULT_PORT)]
    );
}

#[tokio::test]
async fn other_clusters_resources_are_left_alone() {
    let cloud = Arc::new(FakeCloud::new());
    let ours = controller(&cloud, Arc::new(StaticLister::new(two_sites())), true);
    ours.sync().await.unwrap();

    let config = Arc::new(ControllerConfig {
        run_mode: RunMode::OutOfCluster,
        cluster_name: "other".to_string(),
        ..ControllerConfig::new(DEFAULT_PORT)
    });
    let cluster = Arc::new(ClusterManager::new(config, CloudInterfaces::fake(&cloud)).unwrap());
    let theirs = LoadBalancerController::new(cluster, Arc::new(StaticLister::default()));
    theirs.sync().await.unwrap();
    assert_eq!(cloud.forwarding_rule_names().len(), 2);

    ours.stop().await.unwrap();
    assert_eq!(ours.wait_for_exit().await, 0);
    assert!(cloud.forwarding_rule_names().is_empty());
    // Only the other cluster's default backend remains.
    assert_eq!(
        cloud.backend_service_names(),
        vec![Namer::new("other").backend_service(DEFAULT_PORT)]
    );
}
