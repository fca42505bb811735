//! Health checker
//!
//! One HTTP health check per backend port. Ordering against the backend
//! service that references it is the backend pool's job.

use std::sync::Arc;

use tracing::info;

use crate::cloud::{HealthChecks, HttpHealthCheck};
use crate::error::Result;
use crate::naming::Namer;

const DESCRIPTION: &str = "Default kubernetes L7 Loadbalancing health check.";
const CHECK_INTERVAL_SEC: i64 = 1;
const TIMEOUT_SEC: i64 = 1;
const HEALTHY_THRESHOLD: i64 = 1;
const UNHEALTHY_THRESHOLD: i64 = 10;

pub struct HealthChecker {
    cloud: Arc<dyn HealthChecks>,
    namer: Namer,
    request_path: String,
}

impl HealthChecker {
    pub fn new(cloud: Arc<dyn HealthChecks>, namer: Namer, request_path: impl Into<String>) -> Self {
        Self {
            cloud,
            namer,
            request_path: request_path.into(),
        }
    }

    fn desired(&self, port: i64) -> HttpHealthCheck {
        HttpHealthCheck {
            name: self.namer.health_check(port),
            description: DESCRIPTION.to_string(),
            port,
            request_path: self.request_path.clone(),
            check_interval_sec: CHECK_INTERVAL_SEC,
            timeout_sec: TIMEOUT_SEC,
            healthy_threshold: HEALTHY_THRESHOLD,
            unhealthy_threshold: UNHEALTHY_THRESHOLD,
        }
    }

    /// Create the health check for `port`, or fix its request path.
    pub async fn add(&self, port: i64) -> Result<HttpHealthCheck> {
        let desired = self.desired(port);
        match self.cloud.get_http_health_check(&desired.name).await {
            Ok(existing) if existing.request_path == desired.request_path => Ok(existing),
            Ok(existing) => {
                info!(
                    "Updating health check {} path {} -> {}",
                    desired.name, existing.request_path, desired.request_path
                );
                let updated = HttpHealthCheck {
                    request_path: desired.request_path,
                    ..existing
                };
                self.cloud.update_http_health_check(&updated).await?;
                Ok(updated)
            }
            Err(e) if e.is_not_found() => {
                info!("Creating health check {}", desired.name);
                self.cloud.create_http_health_check(&desired).await?;
                Ok(desired)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the health check for `port`; already gone counts as done.
    pub async fn delete(&self, port: i64) -> Result<()> {
        let name = self.namer.health_check(port);
        info!("Deleting health check {}", name);
        match self.cloud.delete_http_health_check(&name).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    pub async fn get(&self, port: i64) -> Result<HttpHealthCheck> {
        self.cloud
            .get_http_health_check(&self.namer.health_check(port))
            .await
    }
}
