//! glbc: GCE L7 load balancer controller for Kubernetes Ingress
//!
//! This crate reconciles Ingress objects into Google Cloud HTTP load
//! balancers: instance groups, health checks, backend services, url maps,
//! target proxies and forwarding rules.

pub mod cloud;
pub mod config;
pub mod controller;
pub mod error;
pub mod naming;
pub mod pools;
pub mod storage;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
