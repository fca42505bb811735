//! Node pool
//!
//! Keeps the cluster-wide instance group's membership equal to the set of
//! Ready nodes, and its named ports equal to the ports backend services use.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::cloud::{InstanceGroup, InstanceGroups, NamedPort};
use crate::error::{Error, Result};
use crate::naming::Namer;
use crate::storage::Snapshotter;

pub struct InstancePool {
    cloud: Arc<dyn InstanceGroups>,
    namer: Namer,
    snapshotter: Snapshotter<String, InstanceGroup>,
}

impl InstancePool {
    pub fn new(cloud: Arc<dyn InstanceGroups>, namer: Namer) -> Self {
        Self {
            cloud,
            namer,
            snapshotter: Snapshotter::new(),
        }
    }

    /// Name of the instance group this pool manages.
    pub fn group_name(&self) -> String {
        self.namer.instance_group()
    }

    /// Get the cluster instance group, creating it when missing.
    pub async fn ensure_group(&self) -> Result<InstanceGroup> {
        let name = self.group_name();
        let group = match self.cloud.get_instance_group(&name).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => {
                info!("Creating instance group {}", name);
                match self.cloud.create_instance_group(&name).await {
                    Ok(group) => group,
                    // Lost a race with another writer; theirs is as good as ours.
                    Err(Error::AlreadyExists { .. }) => self.cloud.get_instance_group(&name).await?,
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };
        self.snapshotter.add(name, group.clone());
        Ok(group)
    }

    #[instrument(skip(self, nodes), fields(count = nodes.len()))]
    pub async fn add(&self, nodes: &[String]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let group = self.ensure_group().await?;
        info!("Adding nodes {:?} to {}", nodes, group.name);
        self.cloud
            .add_instances_to_instance_group(&group.name, nodes)
            .await
    }

    #[instrument(skip(self, nodes), fields(count = nodes.len()))]
    pub async fn remove(&self, nodes: &[String]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let name = self.group_name();
        info!("Removing nodes {:?} from {}", nodes, name);
        match self
            .cloud
            .remove_instances_from_instance_group(&name, nodes)
            .await
        {
            // No group, no members.
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Make the group's membership exactly `nodes`.
    #[instrument(skip(self, nodes), fields(count = nodes.len()))]
    pub async fn sync(&self, nodes: &[String]) -> Result<()> {
        let group = self.ensure_group().await?;
        let desired: BTreeSet<&String> = nodes.iter().collect();
        let current = self
            .cloud
            .list_instances_in_instance_group(&group.name)
            .await?;
        let current_set: BTreeSet<&String> = current.iter().collect();

        let to_add: Vec<String> = desired
            .difference(&current_set)
            .map(|n| n.to_string())
            .collect();
        let to_remove: Vec<String> = current_set
            .difference(&desired)
            .map(|n| n.to_string())
            .collect();
        debug!(
            "Instance group {}: {} to add, {} to remove",
            group.name,
            to_add.len(),
            to_remove.len()
        );

        let mut errors = Vec::new();
        if let Err(e) = self.add(&to_add).await {
            errors.push(e);
        }
        if let Err(e) = self.remove(&to_remove).await {
            errors.push(e);
        }
        if errors.is_empty() {
            self.snapshotter.add(
                group.name.clone(),
                InstanceGroup {
                    size: desired.len() as i64,
                    ..group
                },
            );
        }
        Error::from_errors(errors)
    }

    pub async fn get(&self, name: &str) -> Result<InstanceGroup> {
        self.cloud.get_instance_group(name).await
    }

    /// Last group state written by this pool.
    pub fn committed(&self) -> Option<InstanceGroup> {
        self.snapshotter.get(&self.group_name())
    }

    /// Ensure the group exposes `port` as a named port.
    pub async fn add_named_port(&self, port: i64) -> Result<NamedPort> {
        let group = self.ensure_group().await?;
        self.cloud.add_port_to_instance_group(&group, port).await
    }

    /// Drop every named port whose port is not in `ports`.
    #[instrument(skip(self, ports))]
    pub async fn sync_named_ports(&self, ports: &[i64]) -> Result<()> {
        let name = self.group_name();
        let group = match self.cloud.get_instance_group(&name).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let keep: Vec<NamedPort> = group
            .named_ports
            .iter()
            .filter(|np| ports.contains(&np.port))
            .cloned()
            .collect();
        if keep.len() == group.named_ports.len() {
            return Ok(());
        }
        info!(
            "Pruning named ports on {} to {:?}",
            name,
            keep.iter().map(|np| np.port).collect::<Vec<_>>()
        );
        self.cloud.set_named_ports(&name, &keep).await
    }

    /// Delete the cluster instance group.
    pub async fn shutdown(&self) -> Result<()> {
        let name = self.group_name();
        info!("Deleting instance group {}", name);
        match self.cloud.delete_instance_group(&name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.snapshotter.delete(&name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::FakeCloud;

    fn pool() -> (Arc<FakeCloud>, InstancePool) {
        let cloud = Arc::new(FakeCloud::new());
        let pool = InstancePool::new(cloud.clone(), Namer::default());
        (cloud, pool)
    }

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn sync_sets_membership_exactly() {
        let (cloud, pool) = pool();
        pool.sync(&names(&["n1", "n2", "n3"])).await.unwrap();
        pool.sync(&names(&["n3", "n4"])).await.unwrap();
        assert_eq!(
            cloud.instance_group_members("k8s-ig--foo"),
            names(&["n3", "n4"])
        );
        assert_eq!(pool.committed().map(|g| g.size), Some(2));
    }

    #[tokio::test]
    async fn repeated_sync_issues_no_mutations() {
        let (cloud, pool) = pool();
        pool.sync(&names(&["n1", "n2"])).await.unwrap();
        cloud.clear_calls();
        pool.sync(&names(&["n2", "n1"])).await.unwrap();
        assert!(cloud.calls().is_empty(), "{:?}", cloud.calls());
    }

    #[tokio::test]
    async fn stale_members_are_removed() {
        let (cloud, pool) = pool();
        let group = pool.ensure_group().await.unwrap();
        cloud
            .add_instances_to_instance_group(&group.name, &names(&["gone"]))
            .await
            .unwrap();
        pool.sync(&names(&["n1"])).await.unwrap();
        assert_eq!(cloud.instance_group_members(&group.name), names(&["n1"]));
    }

    #[tokio::test]
    async fn named_ports_are_pruned_to_desired() {
        let (cloud, pool) = pool();
        pool.add_named_port(30301).await.unwrap();
        pool.add_named_port(30302).await.unwrap();
        pool.sync_named_ports(&[30302]).await.unwrap();
        let group = cloud.get_instance_group("k8s-ig--foo").await.unwrap();
        assert_eq!(group.named_ports.len(), 1);
        assert_eq!(group.named_ports[0].port, 30302);
    }

    #[tokio::test]
    async fn shutdown_tolerates_missing_group() {
        let (cloud, pool) = pool();
        pool.shutdown().await.unwrap();
        pool.sync(&names(&["n1"])).await.unwrap();
        pool.shutdown().await.unwrap();
        assert!(cloud.instance_group_names().is_empty());
        assert!(pool.get("k8s-ig--foo").await.unwrap_err().is_not_found());
    }
}
