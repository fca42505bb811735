//! Error types for the load balancer controller

use std::fmt;

use thiserror::Error;

/// Kind of cloud resource an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    InstanceGroup,
    BackendService,
    HealthCheck,
    UrlMap,
    TargetProxy,
    ForwardingRule,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::InstanceGroup => "instance group",
            ResourceKind::BackendService => "backend service",
            ResourceKind::HealthCheck => "health check",
            ResourceKind::UrlMap => "url map",
            ResourceKind::TargetProxy => "target proxy",
            ResourceKind::ForwardingRule => "forwarding rule",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// The resource does not exist in the cloud
    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },

    /// A resource with the same name already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// Delete rejected because another resource still references this one
    #[error("{kind} {name} is still in use by {dependent}")]
    ResourceInUse {
        kind: ResourceKind,
        name: String,
        dependent: String,
    },

    /// Create or update referenced a resource that does not exist
    #[error("{kind} {name} references missing {missing}")]
    MissingDependency {
        kind: ResourceKind,
        name: String,
        missing: String,
    },

    /// Transient failure reported by the cloud API
    #[error("Cloud API error: {0}")]
    CloudError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid or missing configuration; fatal at startup
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Several independent operations failed
    #[error("{} errors: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<Error>),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_in_use(&self) -> bool {
        matches!(self, Error::ResourceInUse { .. })
    }

    /// Short label used for metrics and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::ResourceInUse { .. } | Error::MissingDependency { .. } => "dependency",
            Error::CloudError(_) | Error::HttpError(_) => "cloud",
            Error::KubeError(_) => "kube",
            Error::SerializationError(_) => "serialization",
            Error::IoError(_) => "io",
            Error::ConfigError(_) => "config",
            Error::Multiple(_) => "multiple",
        }
    }

    /// Fold the errors collected during a Sync/GC pass into one result.
    pub fn from_errors(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
