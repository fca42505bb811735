//! Response bodies for the admin API

use serde::Serialize;

use crate::pools::{L7Record, L7};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerListResponse {
    pub items: Vec<L7Record>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerDetailResponse {
    #[serde(flatten)]
    pub load_balancer: L7,
    /// Cached pipeline state, absent if this controller never touched it
    pub status: Option<L7Record>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}
