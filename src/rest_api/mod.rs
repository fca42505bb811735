//! Admin HTTP API
//!
//! Liveness, shutdown, metrics and read-only load balancer status.

mod dto;
mod handlers;
mod server;

pub use server::{router, run_server, AppState};
