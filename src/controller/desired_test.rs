//! Tests for desired state computation

#[cfg(test)]
mod tests {
    use super::super::desired::*;
    use super::super::fixtures::*;
    use crate::naming::Namer;
    use crate::pools::L7Request;

    const DEFAULT_PORT: i64 = 30300;

    fn compute(objects: &ClusterObjects) -> DesiredState {
        DesiredState::compute(objects, &Namer::default(), DEFAULT_PORT)
    }

    #[test]
    fn empty_cluster_wants_only_the_default_backend() {
        let desired = compute(&ClusterObjects::default());
        assert!(desired.nodes.is_empty());
        assert_eq!(desired.ports, vec![DEFAULT_PORT]);
        assert!(desired.load_balancers.is_empty());
    }

    #[test]
    fn only_ready_nodes_are_members() {
        let objects = ClusterObjects {
            nodes: vec![node("n2", true), node("n1", true), node("n3", false)],
            ..Default::default()
        };
        assert_eq!(compute(&objects).nodes, vec!["n1", "n2"]);
    }

    #[test]
    fn default_backend_ingress_resolves_node_port() {
        let objects = ClusterObjects {
            ingresses: vec![default_ingress("default", "web", "web-svc", 80)],
            services: vec![service("default", "web-svc", &[(80, 30301)])],
            ..Default::default()
        };
        let desired = compute(&objects);
        assert_eq!(desired.ports, vec![DEFAULT_PORT, 30301]);
        assert_eq!(
            desired.load_balancers,
            vec![L7Request::new("7-default-web").with_default_backend(30301)]
        );
        assert_eq!(desired.load_balancer_names(), vec!["7-default-web"]);
    }

    #[test]
    fn host_rules_become_routes() {
        let objects = ClusterObjects {
            ingresses: vec![rule_ingress(
                "shop",
                "front",
                "foo.example.com",
                &[("/cart", "cart", 80), ("/search", "search", 8080)],
            )],
            services: vec![
                service("shop", "cart", &[(80, 30310)]),
                service("shop", "search", &[(8080, 30320), (9090, 30321)]),
            ],
            ..Default::default()
        };
        let desired = compute(&objects);
        assert_eq!(desired.ports, vec![DEFAULT_PORT, 30310, 30320]);
        assert_eq!(
            desired.load_balancers,
            vec![L7Request::new("4-shop-front")
                .with_route("foo.example.com", "/cart", 30310)
                .with_route("foo.example.com", "/search", 30320)]
        );
    }

    #[test]
    fn ingresses_with_colliding_joined_names_get_separate_load_balancers() {
        let objects = ClusterObjects {
            ingresses: vec![
                default_ingress("a-b", "c", "web", 80),
                default_ingress("a", "b-c", "web", 80),
            ],
            services: vec![
                service("a-b", "web", &[(80, 30301)]),
                service("a", "web", &[(80, 30302)]),
            ],
            ..Default::default()
        };
        let desired = compute(&objects);
        assert_eq!(desired.load_balancers.len(), 2);
        assert_ne!(
            desired.load_balancers[0].name,
            desired.load_balancers[1].name
        );
    }

    #[test]
    fn empty_path_routes_everything() {
        let objects = ClusterObjects {
            ingresses: vec![rule_ingress("default", "web", "a.example.com", &[("", "web", 80)])],
            services: vec![service("default", "web", &[(80, 30301)])],
            ..Default::default()
        };
        let request = &compute(&objects).load_balancers[0];
        assert_eq!(request.routes["a.example.com"]["/*"], 30301);
    }

    #[test]
    fn unresolved_backends_are_skipped() {
        let objects = ClusterObjects {
            ingresses: vec![rule_ingress(
                "default",
                "web",
                "a.example.com",
                &[("/ok", "web", 80), ("/missing", "gone", 80), ("/wrong", "web", 81)],
            )],
            // A service in another namespace does not count.
            services: vec![
                service("default", "web", &[(80, 30301)]),
                service("other", "gone", &[(80, 30399)]),
            ],
            ..Default::default()
        };
        let desired = compute(&objects);
        assert_eq!(desired.ports, vec![DEFAULT_PORT, 30301]);
        assert_eq!(
            desired.load_balancers,
            vec![L7Request::new("7-default-web").with_route("a.example.com", "/ok", 30301)]
        );
    }

    #[test]
    fn other_ingress_classes_are_ignored() {
        let nginx = with_annotation(
            default_ingress("default", "nginx", "web", 80),
            INGRESS_CLASS_ANNOTATION,
            "nginx",
        );
        let gce = with_annotation(
            default_ingress("default", "gce", "web", 80),
            INGRESS_CLASS_ANNOTATION,
            GCE_INGRESS_CLASS,
        );
        assert!(!is_gce_ingress(&nginx));
        assert!(is_gce_ingress(&gce));

        let objects = ClusterObjects {
            ingresses: vec![nginx, gce],
            services: vec![service("default", "web", &[(80, 30301)])],
            ..Default::default()
        };
        assert_eq!(compute(&objects).load_balancer_names(), vec!["7-default-gce"]);
    }

    #[test]
    fn named_service_ports_resolve() {
        let ingress: k8s_openapi::api::networking::v1::Ingress =
            serde_json::from_value(serde_json::json!({
                "metadata": { "name": "web", "namespace": "default" },
                "spec": {
                    "defaultBackend": { "service": { "name": "web", "port": { "name": "p80" } } }
                }
            }))
            .unwrap();
        let services = vec![service("default", "web", &[(80, 30301)])];
        let backend = ingress.spec.unwrap().default_backend.unwrap();
        assert_eq!(resolve_node_port(&backend, "default", &services), Some(30301));
    }
}
