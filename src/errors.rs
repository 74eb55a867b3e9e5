//! Structured error types for the watch-and-dispatch daemon.
//!
//! Each concern gets its own enum; `AppError` composes them via `#[from]`
//! so call sites can propagate with `?` regardless of which layer failed.

use thiserror::Error;

/// Top-level application error.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("kubernetes error: {0}")]
    Kubernetes(#[from] K8sError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failures from the task-lifecycle plumbing (spawn bookkeeping,
    /// shutdown join errors) rather than from any specific domain.
    #[error("task error: {0}")]
    Task(String),
}

/// Cluster-facing failures. All are retryable unless noted.
#[derive(Error, Debug)]
pub enum K8sError {
    /// The watch or list call failed for protocol/connection reasons.
    #[error("transient upstream failure for {resource_type}: {message}")]
    TransientUpstream {
        resource_type: String,
        message: String,
    },

    #[error("failed to build kubernetes client: {source}")]
    ClientCreationFailed {
        #[from]
        source: kube::Error,
    },

    #[error("failed to load kubeconfig: {source}")]
    KubeconfigLoadFailed {
        #[from]
        source: kube::config::KubeconfigError,
    },

    #[error("resource not found: {resource_type}/{name} in namespace {namespace:?}")]
    ResourceNotFound {
        resource_type: String,
        name: String,
        namespace: Option<String>,
    },

    #[error("unknown resource kind: {kind}")]
    UnknownKind { kind: String },
}

impl K8sError {
    pub fn transient(resource_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientUpstream {
            resource_type: resource_type.into(),
            message: message.into(),
        }
    }
}

/// Object-level projection failures. Policy: log and skip, store left intact.
#[derive(Error, Debug)]
pub enum ProjectionError {
    /// The raw object lacks metadata required to derive an identity.
    #[error("malformed object for {kind}: {message}")]
    MalformedObject { kind: String, message: String },

    /// A field that should parse to the projector's expected shape did not.
    #[error("projection failed for {kind}/{name}: {message}")]
    Failed {
        kind: String,
        name: String,
        message: String,
    },
}

impl ProjectionError {
    pub fn malformed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedObject {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn failed(kind: impl Into<String>, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Delivery failures toward either sink. Policy: log, leave dirty flags set.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("metric sink rejected {failed} of {total} items")]
    MetricRejected { failed: usize, total: usize },

    #[error("inventory sink request failed: {0}")]
    InventoryRequestFailed(#[from] reqwest::Error),

    #[error("inventory sink returned status {status}")]
    InventoryStatus { status: u16 },

    /// A send was attempted before discovery has been announced for the kind (I5/I6).
    #[error("precondition blocked: {kind} has no discovery timestamp yet")]
    PreconditionBlocked { kind: String },
}

/// Startup/config validation failures. Fatal — logged then the process exits.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {value} (expected {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("unknown k8s_config_type: {0}")]
    UnknownClientMode(String),

    #[error("missing required configuration: {field}")]
    MissingRequired { field: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, value: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
pub type K8sResult<T> = Result<T, K8sError>;
pub type SinkResult<T> = Result<T, SinkError>;
pub type ProjectionResult<T> = Result<T, ProjectionError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
