//! Cluster manager
//!
//! Wires the four pools to one set of cloud interfaces and one naming
//! scheme. Holds no reconcile logic of its own.

use std::sync::Arc;

use tracing::{info, warn};

use crate::cloud::{CloudInterfaces, FakeCloud, GceCloud};
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::naming::Namer;
use crate::pools::{BackendPool, HealthChecker, InstancePool, LoadBalancerPool};

pub struct ClusterManager {
    config: Arc<ControllerConfig>,
    namer: Namer,
    pub instance_pool: Arc<InstancePool>,
    pub health_checker: Arc<HealthChecker>,
    pub backend_pool: Arc<BackendPool>,
    pub l7_pool: Arc<LoadBalancerPool>,
}

impl ClusterManager {
    /// Validate `config` and build the pools. Nothing touches the cloud here.
    pub fn new(config: Arc<ControllerConfig>, cloud: CloudInterfaces) -> Result<Self> {
        config.validate()?;

        let namer = Namer::new(config.cluster_name.clone());
        let instance_pool = Arc::new(InstancePool::new(cloud.instance_groups, namer.clone()));
        let health_checker = Arc::new(HealthChecker::new(
            cloud.health_checks,
            namer.clone(),
            config.health_check_path.clone(),
        ));
        let backend_pool = Arc::new(BackendPool::new(
            cloud.backend_services,
            health_checker.clone(),
            instance_pool.clone(),
            namer.clone(),
        ));
        let l7_pool = Arc::new(LoadBalancerPool::new(
            cloud.load_balancers,
            backend_pool.clone(),
            namer.clone(),
            config.default_backend_node_port,
            config.delete_all_on_quit,
        ));

        info!(
            "Cluster manager ready for cluster {} (default backend node port {})",
            config.cluster_name, config.default_backend_node_port
        );
        Ok(Self {
            config,
            namer,
            instance_pool,
            health_checker,
            backend_pool,
            l7_pool,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn namer(&self) -> &Namer {
        &self.namer
    }

    pub fn default_backend_port(&self) -> i64 {
        self.config.default_backend_node_port
    }

    /// Tear down every owned resource when configured to delete all on quit.
    ///
    /// Every pool is attempted even if an earlier one failed; the errors
    /// are returned together.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.config.delete_all_on_quit {
            info!("Leaving cloud resources in place on shutdown");
            return Ok(());
        }
        info!("Deleting all cloud resources owned by {}", self.config.cluster_name);

        let mut errors = Vec::new();
        if let Err(e) = self.l7_pool.shutdown().await {
            warn!("Load balancer teardown failed: {}", e);
            errors.push(e);
        }
        if let Err(e) = self.backend_pool.shutdown().await {
            warn!("Backend teardown failed: {}", e);
            errors.push(e);
        }
        if let Err(e) = self.instance_pool.shutdown().await {
            warn!("Instance group teardown failed: {}", e);
            errors.push(e);
        }
        Error::from_errors(errors)
    }
}

/// Build the cloud interfaces for `config`: the Compute API when running in
/// cluster, the in-memory cloud otherwise.
pub fn cloud_for(config: &ControllerConfig, access_token: Option<&str>) -> Result<CloudInterfaces> {
    if !config.run_mode.uses_real_cloud() {
        info!("Using the in-memory cloud");
        return Ok(CloudInterfaces::fake(&Arc::new(FakeCloud::new())));
    }
    let token = access_token
        .ok_or_else(|| Error::ConfigError("GCE_ACCESS_TOKEN must be set".to_string()))?;
    let cloud = GceCloud::new(&config.gce, token)?;
    info!(
        "Using GCE project {} zone {}",
        config.gce.project, config.gce.zone
    );
    Ok(CloudInterfaces::gce(Arc::new(cloud)))
}
