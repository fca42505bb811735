//! Controller module for Ingress reconciliation
//!
//! This module contains the cluster manager that owns the pools, the
//! desired-state computation over Ingresses, Services and Nodes, and the
//! reconcile loop that drives the pools towards it.

pub mod cluster_manager;
pub mod desired;
#[cfg(test)]
mod desired_test;
#[cfg(test)]
mod fixtures;
pub mod lister;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
#[cfg(test)]
mod reconciler_test;

pub use cluster_manager::{cloud_for, ClusterManager};
pub use desired::{ClusterObjects, DesiredState};
pub use lister::{ClusterLister, KubeLister, StaticLister};
pub use reconciler::LoadBalancerController;
