//! Cluster object listing and change notification

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams};
use kube::error::ErrorResponse;
use kube::{Client, Resource};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::desired::ClusterObjects;
use crate::error::{Error, Result};

/// Read-only view of the objects the controller reconciles against.
#[async_trait]
pub trait ClusterLister: Send + Sync {
    async fn list_ingresses(&self) -> Result<Vec<Ingress>>;
    async fn list_services(&self) -> Result<Vec<Service>>;
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    async fn list_all(&self) -> Result<ClusterObjects> {
        Ok(ClusterObjects {
            ingresses: self.list_ingresses().await?,
            services: self.list_services().await?,
            nodes: self.list_nodes().await?,
        })
    }
}

/// Lists straight from the API server.
pub struct KubeLister {
    client: Client,
}

impl KubeLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Watch Ingresses, Services and Nodes, waking `notify` on every change
    /// until `shutdown` turns `true`.
    pub fn spawn_watchers(
        &self,
        notify: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            spawn_watch(
                Api::<Ingress>::all(self.client.clone()),
                notify.clone(),
                shutdown.clone(),
            ),
            spawn_watch(
                Api::<Service>::all(self.client.clone()),
                notify.clone(),
                shutdown.clone(),
            ),
            spawn_watch(Api::<Node>::all(self.client.clone()), notify, shutdown),
        ]
    }
}

fn spawn_watch<K>(
    api: Api<K>,
    notify: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    tokio::spawn(async move {
        let kind = K::kind(&K::DynamicType::default()).to_string();
        info!("Watching {} objects", kind);
        let events = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        forward_events(&kind, events, notify, shutdown).await;
    })
}

/// Wake `notify` for every event until the stream ends or `shutdown` turns
/// `true`.
async fn forward_events<S, T, E>(
    kind: &str,
    mut events: S,
    notify: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Stream<Item = std::result::Result<T, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stopped| *stopped) => break,
            event = events.next() => match event {
                Some(Ok(_)) => {
                    debug!("{} changed", kind);
                    notify.notify_one();
                }
                Some(Err(e)) => warn!("{} watch error: {}", kind, e),
                None => break,
            },
        }
    }
    info!("Stopped watching {} objects", kind);
}

#[async_trait]
impl ClusterLister for KubeLister {
    async fn list_ingresses(&self) -> Result<Vec<Ingress>> {
        let api: Api<Ingress> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        Ok(list.items)
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let api: Api<Service> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        Ok(list.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        Ok(list.items)
    }
}

/// Serves a fixed set of objects, replaceable between syncs.
#[derive(Default)]
pub struct StaticLister {
    objects: Mutex<ClusterObjects>,
    unavailable: AtomicBool,
}

impl StaticLister {
    pub fn new(objects: ClusterObjects) -> Self {
        Self {
            objects: Mutex::new(objects),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn set(&self, objects: ClusterObjects) {
        *self.objects.lock().unwrap_or_else(|e| e.into_inner()) = objects;
    }

    /// Make every list call fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn read(&self) -> Result<ClusterObjects> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::KubeError(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "API server unavailable".to_string(),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            })));
        }
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

#[async_trait]
impl ClusterLister for StaticLister {
    async fn list_ingresses(&self) -> Result<Vec<Ingress>> {
        Ok(self.read()?.ingresses)
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self.read()?.services)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.read()?.nodes)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;

    use super::*;

    #[tokio::test]
    async fn events_wake_the_controller_until_shutdown() {
        let notify = Arc::new(Notify::new());
        let (shutdown, signal) = watch::channel(false);
        let events = stream::iter(vec![Ok::<u32, String>(1), Err("gone".to_string())])
            .chain(stream::pending());
        let task = tokio::spawn({
            let notify = notify.clone();
            async move { forward_events("Ingress", events, notify, signal).await }
        });

        tokio::time::timeout(Duration::from_secs(5), notify.notified())
            .await
            .unwrap();
        assert!(!task.is_finished());

        shutdown.send_replace(true);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn already_stopped_watch_ends_immediately() {
        let (_shutdown, signal) = watch::channel(true);
        let events = stream::pending::<std::result::Result<u32, String>>();
        tokio::time::timeout(
            Duration::from_secs(5),
            forward_events("Node", events, Arc::new(Notify::new()), signal),
        )
        .await
        .unwrap();
    }
}
