//! Controller configuration
//!
//! Built once at startup from the command line and shared read-only by the
//! cluster manager, the controller and the admin API.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::naming::DEFAULT_CLUSTER_NAME;

/// Default resync period
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(30);
/// Default health check request path
pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/";
/// Port on which the admin API (/healthz, /quit) listens
pub const DEFAULT_API_PORT: u16 = 8081;

/// How the controller reaches Kubernetes and which cloud it drives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Pod credentials for Kubernetes, live GCE cloud
    InCluster,
    /// Kubeconfig credentials for Kubernetes, fake cloud
    OutOfCluster,
    /// Kubernetes through a local `kubectl proxy`, fake cloud
    DryRun { proxy_url: String },
}

impl RunMode {
    /// Only the in-cluster mode mutates real cloud resources.
    pub fn uses_real_cloud(&self) -> bool {
        matches!(self, RunMode::InCluster)
    }
}

/// Settings for the live Compute API client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GceSettings {
    pub project: String,
    pub zone: String,
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub cluster_name: String,
    pub run_mode: RunMode,
    pub resync_period: Duration,
    pub delete_all_on_quit: bool,
    pub default_backend_node_port: i64,
    pub health_check_path: String,
    pub api_port: u16,
    pub gce: GceSettings,
}

impl ControllerConfig {
    /// A configuration with every optional setting at its default.
    pub fn new(default_backend_node_port: i64) -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            run_mode: RunMode::InCluster,
            resync_period: DEFAULT_RESYNC_PERIOD,
            delete_all_on_quit: false,
            default_backend_node_port,
            health_check_path: DEFAULT_HEALTH_CHECK_PATH.to_string(),
            api_port: DEFAULT_API_PORT,
            gce: GceSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_backend_node_port == 0 {
            return Err(Error::ConfigError(
                "default backend node port must be specified".to_string(),
            ));
        }
        if !(1..=65535).contains(&self.default_backend_node_port) {
            return Err(Error::ConfigError(format!(
                "default backend node port {} is out of range",
                self.default_backend_node_port
            )));
        }
        if self.cluster_name.is_empty() {
            return Err(Error::ConfigError("cluster name must not be empty".to_string()));
        }
        if !self.health_check_path.starts_with('/') {
            return Err(Error::ConfigError(format!(
                "health check path {:?} must start with '/'",
                self.health_check_path
            )));
        }
        if self.resync_period.is_zero() {
            return Err(Error::ConfigError("sync period must be positive".to_string()));
        }
        if self.run_mode.uses_real_cloud()
            && (self.gce.project.is_empty() || self.gce.zone.is_empty())
        {
            return Err(Error::ConfigError(
                "GCE project and zone are required when running in cluster".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse durations such as `30s`, `500ms`, `5m` or `1h`. A bare number is
/// taken as seconds.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (value, unit) = input.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration {input:?}"))?;
    let duration = match unit {
        "" | "s" => Duration::from_secs(value),
        "ms" => Duration::from_millis(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        other => return Err(format!("unknown duration unit {other:?} in {input:?}")),
    };
    Ok(duration)
}
