use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use glbc::config::{
    parse_duration, ControllerConfig, GceSettings, RunMode, DEFAULT_API_PORT,
    DEFAULT_HEALTH_CHECK_PATH,
};
use glbc::controller::{cloud_for, ClusterManager, KubeLister, LoadBalancerController};
use glbc::naming::DEFAULT_CLUSTER_NAME;
use glbc::{telemetry, Error};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the OAuth access token for the Compute API
const ACCESS_TOKEN_ENV: &str = "GCE_ACCESS_TOKEN";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tag appended to every cloud resource this controller owns
    #[arg(
        long,
        alias = "gce-cluster-name",
        env = "GLBC_CLUSTER_NAME",
        default_value = DEFAULT_CLUSTER_NAME
    )]
    cluster_name: String,

    /// Use the pod's service account and the live GCE cloud
    #[arg(long, env = "GLBC_IN_CLUSTER", default_value_t = true, action = ArgAction::Set)]
    running_in_cluster: bool,

    /// Reach Kubernetes through a `kubectl proxy` relay (dry run, fake cloud)
    #[arg(long, env = "GLBC_PROXY")]
    proxy: Option<String>,

    /// Resync period, e.g. 30s, 5m, 500ms
    #[arg(long, env = "GLBC_SYNC_PERIOD", default_value = "30s", value_parser = parse_duration)]
    sync_period: Duration,

    /// Delete every owned cloud resource on shutdown
    #[arg(long, env = "GLBC_DELETE_ALL_ON_QUIT")]
    delete_all_on_quit: bool,

    /// Node port of the default backend service (required)
    #[arg(long, env = "GLBC_DEFAULT_BACKEND_NODE_PORT", default_value_t = 0)]
    default_backend_node_port: i64,

    /// Request path of backend health checks
    #[arg(long, env = "GLBC_HEALTH_CHECK_PATH", default_value = DEFAULT_HEALTH_CHECK_PATH)]
    health_check_path: String,

    /// Port of the admin API
    #[arg(long, env = "GLBC_API_PORT", default_value_t = DEFAULT_API_PORT)]
    api_port: u16,

    #[arg(long, env = "GCE_PROJECT", default_value = "")]
    gce_project: String,

    #[arg(long, env = "GCE_ZONE", default_value = "")]
    gce_zone: String,

    #[arg(long, env = "GLBC_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Args {
    fn run_mode(&self) -> RunMode {
        match (&self.proxy, self.running_in_cluster) {
            (Some(proxy_url), _) => RunMode::DryRun {
                proxy_url: proxy_url.clone(),
            },
            (None, true) => RunMode::InCluster,
            (None, false) => RunMode::OutOfCluster,
        }
    }

    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            cluster_name: self.cluster_name.clone(),
            run_mode: self.run_mode(),
            resync_period: self.sync_period,
            delete_all_on_quit: self.delete_all_on_quit,
            default_backend_node_port: self.default_backend_node_port,
            health_check_path: self.health_check_path.clone(),
            api_port: self.api_port,
            gce: GceSettings {
                project: self.gce_project.clone(),
                zone: self.gce_zone.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting glbc v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(args.controller_config());
    // Fails fast on a missing default backend before anything is contacted.
    config.validate()?;

    let client = kube_client(&config.run_mode).await?;
    info!("Connected to Kubernetes cluster");

    let access_token = std::env::var(ACCESS_TOKEN_ENV).ok();
    let cloud = cloud_for(&config, access_token.as_deref())?;
    let cluster = Arc::new(ClusterManager::new(config.clone(), cloud)?);

    let lister = Arc::new(KubeLister::new(client));
    let controller = Arc::new(LoadBalancerController::new(cluster, lister.clone()));
    let watchers = lister.spawn_watchers(controller.notifier(), controller.shutdown_signal());

    #[cfg(feature = "rest-api")]
    {
        let state = glbc::rest_api::AppState {
            controller: controller.clone(),
        };
        let port = config.api_port;
        tokio::spawn(async move {
            if let Err(e) = glbc::rest_api::run_server(state, port).await {
                error!("Admin API server error: {:?}", e);
            }
        });
    }

    tokio::spawn(handle_signals(controller.clone()));

    let loop_controller = controller.clone();
    let controller_task = tokio::spawn(async move { loop_controller.run().await });

    let code = controller.wait_for_exit().await;
    if let Err(e) = controller_task.await {
        warn!("Controller task ended abnormally: {}", e);
    }
    for result in futures::future::join_all(watchers).await {
        if let Err(e) = result {
            warn!("Watcher task ended abnormally: {}", e);
        }
    }
    info!("Exiting with code {}", code);

    // Flush any remaining traces
    telemetry::shutdown_telemetry();
    std::process::exit(code);
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Text => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    // Only enable OTEL if an endpoint is provided
    if telemetry::otlp_enabled() {
        match telemetry::init_telemetry(&registry) {
            Ok(otel_layer) => {
                registry.with(otel_layer).init();
                info!("OpenTelemetry tracing initialized");
            }
            Err(e) => {
                registry.init();
                warn!("OpenTelemetry tracing disabled: {}", e);
            }
        }
    } else {
        registry.init();
        info!(
            "OpenTelemetry tracing disabled ({} not set)",
            telemetry::OTLP_ENDPOINT_ENV
        );
    }
}

async fn kube_client(run_mode: &RunMode) -> Result<kube::Client, Error> {
    let config = match run_mode {
        RunMode::InCluster => kube::Config::incluster()
            .map_err(|e| Error::ConfigError(format!("In-cluster config: {}", e)))?,
        RunMode::OutOfCluster => kube::Config::infer()
            .await
            .map_err(|e| Error::ConfigError(format!("Kubeconfig: {}", e)))?,
        RunMode::DryRun { proxy_url } => {
            info!("Dry run through API relay at {}", proxy_url);
            let url = proxy_url
                .parse()
                .map_err(|e| Error::ConfigError(format!("Invalid proxy url {}: {}", proxy_url, e)))?;
            kube::Config::new(url)
        }
    };
    kube::Client::try_from(config).map_err(Error::KubeError)
}

/// The first SIGTERM or SIGINT stops the controller; later ones are ignored.
async fn handle_signals(controller: Arc<LoadBalancerController>) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            return;
        }
    };

    let mut stopping = false;
    loop {
        tokio::select! {
            received = terminate.recv() => {
                if received.is_none() {
                    return;
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for SIGINT: {}", e);
                    return;
                }
            }
        }

        if stopping || controller.is_stopped() {
            info!("Shutdown already in progress, ignoring signal");
            continue;
        }
        stopping = true;
        info!("Received termination signal, shutting down");
        let controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.stop().await {
                error!("Shutdown failed: {}", e);
            }
        });
    }
}
