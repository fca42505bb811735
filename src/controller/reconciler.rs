//! Load balancer controller
//!
//! One loop drives every pool. It wakes on the resync tick or a watch
//! notification, lists cluster objects, computes the desired key sets and
//! runs, in order:
//!
//! 1. node pool sync
//! 2. backend pool sync
//! 3. load balancer pool sync
//! 4. load balancer GC
//! 5. backend GC
//!
//! All syncs precede all GCs, and load balancers are collected before the
//! backends they route to, so no deletion races a resource that still
//! needs it. A pass that has started always finishes before [`stop`]
//! proceeds.
//!
//! [`stop`]: LoadBalancerController::stop

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use super::cluster_manager::ClusterManager;
use super::desired::DesiredState;
use super::lister::ClusterLister;
#[cfg(feature = "metrics")]
use super::metrics;
use crate::error::{Error, Result};

pub struct LoadBalancerController {
    cluster: Arc<ClusterManager>,
    lister: Arc<dyn ClusterLister>,
    resync_period: Duration,
    notify: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    exit_code: watch::Sender<Option<i32>>,
    sync_lock: Mutex<()>,
    stopped: AtomicBool,
}

impl LoadBalancerController {
    pub fn new(cluster: Arc<ClusterManager>, lister: Arc<dyn ClusterLister>) -> Self {
        let resync_period = cluster.config().resync_period;
        let (shutdown, _) = watch::channel(false);
        let (exit_code, _) = watch::channel(None);
        Self {
            cluster,
            lister,
            resync_period,
            notify: Arc::new(Notify::new()),
            shutdown,
            exit_code,
            sync_lock: Mutex::new(()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn cluster(&self) -> &ClusterManager {
        &self.cluster
    }

    /// Handle used by watchers to request a sync.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Flips to `true` once [`stop`](Self::stop) begins; watchers end on it.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Run until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }
        let mut ticker = tokio::time::interval(self.resync_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Starting load balancer controller (resync every {:?})",
            self.resync_period
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => debug!("Resync tick"),
                _ = self.notify.notified() => debug!("Watch event"),
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.sync().await {
                warn!("Sync failed, retrying on next event or tick: {}", e);
            }
        }
        info!("Load balancer controller stopped");
    }

    /// One full reconcile pass.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<()> {
        let _guard = self.sync_lock.lock().await;
        if self.is_stopped() {
            return Ok(());
        }

        // Without a full listing the desired sets are unknown; GC must not run.
        let objects = self.lister.list_all().await?;
        let desired = DesiredState::compute(
            &objects,
            self.cluster.namer(),
            self.cluster.default_backend_port(),
        );
        debug!(
            "Desired: {} nodes, ports {:?}, {} load balancers",
            desired.nodes.len(),
            desired.ports,
            desired.load_balancers.len()
        );

        let cm = &self.cluster;
        let lb_names = desired.load_balancer_names();
        let mut errors = Vec::new();
        step("nodes", cm.instance_pool.sync(&desired.nodes), &mut errors).await;
        step("backends", cm.backend_pool.sync(&desired.ports), &mut errors).await;
        step(
            "loadbalancers",
            cm.l7_pool.sync(&desired.load_balancers),
            &mut errors,
        )
        .await;
        step("loadbalancers_gc", cm.l7_pool.gc(&lb_names), &mut errors).await;
        step("backends_gc", cm.backend_pool.gc(&desired.ports), &mut errors).await;

        #[cfg(feature = "metrics")]
        metrics::set_load_balancers(&cm.l7_pool.statuses());

        Error::from_errors(errors)
    }

    /// Stop the loop and, when configured, delete every owned resource.
    ///
    /// Waits for an in-flight pass to finish first. Only the first call does
    /// any work; later calls return `Ok` immediately. The outcome is
    /// published to [`wait_for_exit`](Self::wait_for_exit).
    pub async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            info!("Shutdown already in progress");
            return Ok(());
        }
        info!("Stopping load balancer controller");
        self.shutdown.send_replace(true);

        let _guard = self.sync_lock.lock().await;
        let result = self.cluster.shutdown().await;
        match &result {
            Ok(()) => info!("Shutdown complete"),
            Err(e) => error!("Shutdown finished with errors: {}", e),
        }
        self.exit_code
            .send_replace(Some(if result.is_ok() { 0 } else { 1 }));
        result
    }

    /// Process exit code once [`stop`](Self::stop) has finished: 0 on a clean
    /// shutdown, 1 if any teardown step failed.
    pub async fn wait_for_exit(&self) -> i32 {
        let mut exit_code = self.exit_code.subscribe();
        let code = match exit_code.wait_for(Option::is_some).await {
            Ok(code) => *code,
            Err(_) => None,
        };
        code.unwrap_or(1)
    }
}

async fn step<F>(pool: &'static str, fut: F, errors: &mut Vec<Error>)
where
    F: Future<Output = Result<()>>,
{
    let start = Instant::now();
    let result = fut.await;
    let elapsed = start.elapsed();
    debug!(pool, elapsed_ms = elapsed.as_millis() as u64, "Sync step finished");
    #[cfg(feature = "metrics")]
    metrics::observe_sync_duration_seconds(pool, elapsed.as_secs_f64());

    if let Err(e) = result {
        warn!(pool, "Sync step failed: {}", e);
        #[cfg(feature = "metrics")]
        metrics::inc_sync_error(pool, e.kind_label());
        errors.push(e);
    }
}
