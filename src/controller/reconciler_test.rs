//! Tests for the reconcile loop
//!
//! These drive the controller against the in-memory cloud and verify:
//! - A full pass builds every resource an Ingress needs
//! - Repeated passes are no-ops
//! - Removing an Ingress collects its resources without dangling references
//! - Listing failures never trigger GC
//! - Stop waits for the in-flight pass and runs shutdown once

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::cluster_manager::ClusterManager;
    use super::super::desired::ClusterObjects;
    use super::super::fixtures::*;
    use super::super::lister::StaticLister;
    use super::super::reconciler::*;
    use crate::cloud::{CloudInterfaces, CloudOp, FakeCloud};
    use crate::config::{ControllerConfig, RunMode};
    use crate::error::ResourceKind;
    use crate::pools::L7Stage;

    const DEFAULT_PORT: i64 = 30300;

    struct Harness {
        cloud: Arc<FakeCloud>,
        lister: Arc<StaticLister>,
        controller: Arc<LoadBalancerController>,
    }

    fn harness(objects: ClusterObjects, delete_all_on_quit: bool) -> Harness {
        let config = Arc::new(ControllerConfig {
            run_mode: RunMode::OutOfCluster,
            delete_all_on_quit,
            resync_period: Duration::from_millis(20),
            ..ControllerConfig::new(DEFAULT_PORT)
        });
        let cloud = Arc::new(FakeCloud::new());
        let cluster =
            Arc::new(ClusterManager::new(config, CloudInterfaces::fake(&cloud)).unwrap());
        let lister = Arc::new(StaticLister::new(objects));
        let controller = Arc::new(LoadBalancerController::new(cluster, lister.clone()));
        Harness {
            cloud,
            lister,
            controller,
        }
    }

    fn web_cluster() -> ClusterObjects {
        ClusterObjects {
            ingresses: vec![default_ingress("default", "web", "web", 80)],
            services: vec![service("default", "web", &[(80, 30301)])],
            nodes: vec![node("n1", true), node("n2", true)],
        }
    }

    #[tokio::test]
    async fn sync_builds_load_balancer_for_ingress() {
        let h = harness(web_cluster(), false);
        h.controller.sync().await.unwrap();

        let namer = h.controller.cluster().namer().clone();
        assert_eq!(
            h.cloud.instance_group_members(&namer.instance_group()),
            vec!["n1", "n2"]
        );
        assert_eq!(
            h.cloud.backend_service_names(),
            vec![namer.backend_service(DEFAULT_PORT), namer.backend_service(30301)]
        );
        assert_eq!(
            h.cloud.forwarding_rule_names(),
            vec![namer.forwarding_rule(&namer.load_balancer("default", "web"))]
        );
        assert!(h.cloud.dangling_backend_references().is_empty());

        let statuses = h.controller.cluster().l7_pool.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].stage, L7Stage::Ready);
    }

    #[tokio::test]
    async fn second_sync_makes_no_cloud_calls() {
        let h = harness(web_cluster(), false);
        h.controller.sync().await.unwrap();
        h.cloud.clear_calls();

        h.controller.sync().await.unwrap();
        assert!(h.cloud.calls().is_empty(), "{:?}", h.cloud.calls());
    }

    #[tokio::test]
    async fn removed_ingress_is_collected_without_dangling_references() {
        let h = harness(web_cluster(), false);
        h.controller.sync().await.unwrap();

        h.lister.set(ClusterObjects {
            ingresses: vec![],
            ..web_cluster()
        });
        h.controller.sync().await.unwrap();

        let namer = h.controller.cluster().namer().clone();
        assert!(h.cloud.forwarding_rule_names().is_empty());
        assert!(h.cloud.target_proxy_names().is_empty());
        assert!(h.cloud.url_map_names().is_empty());
        assert_eq!(
            h.cloud.backend_service_names(),
            vec![namer.backend_service(DEFAULT_PORT)]
        );
        assert!(h.cloud.dangling_backend_references().is_empty());
        assert!(h.controller.cluster().l7_pool.statuses().is_empty());
    }

    #[tokio::test]
    async fn load_balancers_are_collected_before_backends() {
        let h = harness(web_cluster(), false);
        h.controller.sync().await.unwrap();
        h.lister.set(ClusterObjects::default());
        h.cloud.clear_calls();

        h.controller.sync().await.unwrap();
        let calls = h.cloud.calls();
        let url_map = calls
            .iter()
            .position(|c| c.op == CloudOp::Delete && c.kind == ResourceKind::UrlMap)
            .unwrap();
        let backend = calls
            .iter()
            .position(|c| c.op == CloudOp::Delete && c.kind == ResourceKind::BackendService)
            .unwrap();
        assert!(url_map < backend);
    }

    #[tokio::test]
    async fn changed_backend_port_moves_routes_then_collects_old_backend() {
        let h = harness(web_cluster(), false);
        h.controller.sync().await.unwrap();

        h.lister.set(ClusterObjects {
            services: vec![service("default", "web", &[(80, 30302)])],
            ..web_cluster()
        });
        h.controller.sync().await.unwrap();

        let namer = h.controller.cluster().namer().clone();
        assert_eq!(
            h.cloud.backend_service_names(),
            vec![namer.backend_service(DEFAULT_PORT), namer.backend_service(30302)]
        );
        assert!(h.cloud.dangling_backend_references().is_empty());
        let lb = namer.load_balancer("default", "web");
        let l7 = h.controller.cluster().l7_pool.get(&lb).await.unwrap();
        assert_eq!(l7.default_backend, namer.backend_service(30302));
    }

    #[tokio::test]
    async fn listing_failure_skips_garbage_collection() {
        let h = harness(web_cluster(), false);
        h.controller.sync().await.unwrap();
        h.cloud.clear_calls();

        h.lister.set(ClusterObjects::default());
        h.lister.set_unavailable(true);
        assert!(h.controller.sync().await.is_err());
        assert!(h.cloud.calls().is_empty());
        assert_eq!(h.cloud.forwarding_rule_names().len(), 1);
    }

    #[tokio::test]
    async fn failed_pool_does_not_stop_later_pools() {
        let h = harness(web_cluster(), false);
        h.cloud.fail_next(CloudOp::Create, ResourceKind::InstanceGroup);

        let err = h.controller.sync().await.unwrap_err();
        assert!(err.to_string().contains("injected failure"));
        // The backend pool creates the group on its own, so the LB still comes up.
        assert_eq!(h.cloud.forwarding_rule_names().len(), 1);

        h.controller.sync().await.unwrap();
        let namer = h.controller.cluster().namer().clone();
        assert_eq!(
            h.cloud.instance_group_members(&namer.instance_group()),
            vec!["n1", "n2"]
        );
    }

    #[tokio::test]
    async fn stop_deletes_everything_when_asked() {
        let h = harness(web_cluster(), true);
        h.controller.sync().await.unwrap();

        h.controller.stop().await.unwrap();
        assert!(h.controller.is_stopped());
        assert_eq!(h.controller.wait_for_exit().await, 0);
        assert!(h.cloud.forwarding_rule_names().is_empty());
        assert!(h.cloud.backend_service_names().is_empty());
        assert!(h.cloud.health_check_names().is_empty());
        assert!(h.cloud.instance_group_names().is_empty());

        // Nothing is rebuilt once stopped.
        h.controller.sync().await.unwrap();
        assert!(h.cloud.instance_group_names().is_empty());
    }

    #[tokio::test]
    async fn failed_teardown_exits_with_error_code() {
        let h = harness(web_cluster(), true);
        h.controller.sync().await.unwrap();
        h.cloud.fail_next(CloudOp::Delete, ResourceKind::UrlMap);

        assert!(h.controller.stop().await.is_err());
        assert_eq!(h.controller.wait_for_exit().await, 1);
        // The other pools were still attempted.
        assert!(h.cloud.forwarding_rule_names().is_empty());
    }

    #[tokio::test]
    async fn stop_signals_watchers() {
        let h = harness(web_cluster(), false);
        let mut signal = h.controller.shutdown_signal();
        assert!(!*signal.borrow());

        h.controller.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), signal.wait_for(|stopped| *stopped))
            .await
            .unwrap()
            .unwrap();
        // A watcher subscribing late sees the stop too.
        assert!(*h.controller.shutdown_signal().borrow());
    }

    #[tokio::test]
    async fn repeated_stop_runs_shutdown_once() {
        let h = harness(web_cluster(), true);
        h.controller.sync().await.unwrap();
        h.controller.stop().await.unwrap();
        h.cloud.clear_calls();

        h.controller.stop().await.unwrap();
        assert!(h.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn run_syncs_until_stopped() {
        let h = harness(web_cluster(), false);
        let controller = h.controller.clone();
        let handle = tokio::spawn(async move { controller.run().await });

        for _ in 0..100 {
            if !h.cloud.forwarding_rule_names().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.cloud.forwarding_rule_names().len(), 1);

        h.controller.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        // Resources are kept without delete-all.
        assert_eq!(h.cloud.forwarding_rule_names().len(), 1);
    }

    #[tokio::test]
    async fn notification_triggers_sync() {
        let h = harness(ClusterObjects::default(), false);
        let controller = h.controller.clone();
        let handle = tokio::spawn(async move { controller.run().await });

        h.lister.set(web_cluster());
        h.controller.notifier().notify_one();
        for _ in 0..100 {
            if !h.cloud.forwarding_rule_names().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.cloud.forwarding_rule_names().len(), 1);

        h.controller.stop().await.unwrap();
        handle.await.unwrap();
    }
}
