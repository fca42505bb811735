//! Backend pool
//!
//! One backend service per node port, bound to the cluster instance group
//! through a named port and guarded by a health check of the same name.
//!
//! Create order is instance group/named port, health check, backend service;
//! delete order is the reverse. `sync` never deletes: a port that drops out
//! of the desired set is only removed by `gc`, which the controller runs
//! after the load balancers stopped referencing it.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::healthchecks::HealthChecker;
use super::instances::InstancePool;
use crate::cloud::{Backend, BackendService, BackendServices};
use crate::error::{Error, Result};
use crate::naming::Namer;
use crate::storage::Snapshotter;

const DESCRIPTION: &str = "Kubernetes L7 backend service";
const PROTOCOL: &str = "HTTP";

pub struct BackendPool {
    cloud: Arc<dyn BackendServices>,
    health_checker: Arc<HealthChecker>,
    node_pool: Arc<InstancePool>,
    namer: Namer,
    snapshotter: Snapshotter<i64, BackendService>,
}

impl BackendPool {
    pub fn new(
        cloud: Arc<dyn BackendServices>,
        health_checker: Arc<HealthChecker>,
        node_pool: Arc<InstancePool>,
        namer: Namer,
    ) -> Self {
        Self {
            cloud,
            health_checker,
            node_pool,
            namer,
            snapshotter: Snapshotter::new(),
        }
    }

    /// Create or repair the backend service for `port`.
    #[instrument(skip(self))]
    pub async fn add(&self, port: i64) -> Result<BackendService> {
        let group = self.node_pool.ensure_group().await?;
        let named_port = self.node_pool.add_named_port(port).await?;
        let health_check = self.health_checker.add(port).await?;

        let desired = BackendService {
            name: self.namer.backend_service(port),
            description: DESCRIPTION.to_string(),
            port,
            port_name: named_port.name,
            protocol: PROTOCOL.to_string(),
            backends: vec![Backend { group: group.name }],
            health_checks: vec![health_check.name],
        };

        let service = match self.cloud.get_backend_service(&desired.name).await {
            Ok(existing) if !existing.differs_from(&desired) => existing,
            Ok(_) => {
                info!("Updating backend service {}", desired.name);
                self.cloud.update_backend_service(&desired).await?;
                desired
            }
            Err(e) if e.is_not_found() => {
                info!("Creating backend service {}", desired.name);
                self.cloud.create_backend_service(&desired).await?;
                desired
            }
            Err(e) => return Err(e),
        };
        self.snapshotter.add(port, service.clone());
        Ok(service)
    }

    /// Read the backend service for `port` from the cloud.
    pub async fn get(&self, port: i64) -> Result<BackendService> {
        self.cloud
            .get_backend_service(&self.namer.backend_service(port))
            .await
    }

    /// The last backend service this pool committed for `port`.
    pub fn committed(&self, port: i64) -> Option<BackendService> {
        self.snapshotter.get(&port)
    }

    /// Ports with a committed backend service.
    pub fn ports(&self) -> Vec<i64> {
        self.snapshotter.keys()
    }

    /// Delete the backend service for `port`, then its health check.
    ///
    /// Fails with `ResourceInUse` while a url map still routes to it.
    #[instrument(skip(self))]
    pub async fn delete(&self, port: i64) -> Result<()> {
        let name = self.namer.backend_service(port);
        info!("Deleting backend service {}", name);
        match self.cloud.delete_backend_service(&name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.snapshotter.delete(&port);
        self.health_checker.delete(port).await
    }

    /// Ensure a backend service exists for every port in `ports`.
    #[instrument(skip(self, ports), fields(ports = ?ports))]
    pub async fn sync(&self, ports: &[i64]) -> Result<()> {
        let unique: BTreeSet<i64> = ports.iter().copied().collect();
        let mut errors = Vec::new();
        for port in unique {
            if let Err(e) = self.add(port).await {
                warn!("Failed to sync backend for port {}: {}", port, e);
                errors.push(e);
            }
        }
        Error::from_errors(errors)
    }

    /// Delete every owned backend service whose port is not in `ports`.
    ///
    /// Candidates are the committed ports plus any backend service in the
    /// cloud whose name carries this cluster's tag, so leftovers from a
    /// previous run are collected too.
    #[instrument(skip(self, ports), fields(ports = ?ports))]
    pub async fn gc(&self, ports: &[i64]) -> Result<()> {
        let desired: BTreeSet<i64> = ports.iter().copied().collect();
        let mut errors = Vec::new();

        let mut owned: BTreeSet<i64> = self.snapshotter.keys().into_iter().collect();
        match self.cloud.list_backend_services().await {
            Ok(services) => owned.extend(
                services
                    .iter()
                    .filter_map(|svc| self.namer.backend_port(&svc.name)),
            ),
            Err(e) => errors.push(e),
        }

        let mut retained = desired.clone();
        for port in owned.difference(&desired) {
            if let Err(e) = self.delete(*port).await {
                warn!("Failed to delete backend for port {}: {}", port, e);
                retained.insert(*port);
                errors.push(e);
            }
        }

        let retained: Vec<i64> = retained.into_iter().collect();
        if let Err(e) = self.node_pool.sync_named_ports(&retained).await {
            errors.push(e);
        }
        Error::from_errors(errors)
    }

    /// Delete every backend service owned by this cluster.
    pub async fn shutdown(&self) -> Result<()> {
        self.gc(&[]).await
    }
}
