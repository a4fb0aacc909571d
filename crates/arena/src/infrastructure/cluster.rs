use core::error::Error;
use std::collections::BTreeMap;

use error_stack::Report;
use futures::stream::BoxStream;
use kube::api::DynamicObject;
use kube::runtime::watcher;

use crate::access::ResourceKind;

/// Errors that can occur while talking to the control plane.
#[derive(Debug, derive_more::Display)]
pub enum ClusterError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },
    #[display("Kubernetes request failed: {message}")]
    RequestFailed { message: String },
    #[display("Failed to watch {kind}: {message}")]
    WatchFailed { kind: ResourceKind, message: String },
}

impl Error for ClusterError {}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Event stream for one resource kind.
pub type WatchStream =
    BoxStream<'static, Result<watcher::Event<DynamicObject>, Report<ClusterError>>>;

/// Control-plane operations used by the accessor, the cache mirror and the trainers.
///
/// `namespace == None` addresses all namespaces (or a cluster-scoped kind).
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// List objects of `kind`; selectors are passed to the server verbatim.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<DynamicObject>, Report<ClusterError>>;

    /// # Errors
    ///
    /// - [`ClusterError::NotFound`] if no such object exists
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, Report<ClusterError>>;

    /// Subscribe to changes of `kind` across all namespaces.
    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, Report<ClusterError>>;

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Report<ClusterError>>;

    /// Merge `labels` into the object's labels.
    async fn patch_labels(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<DynamicObject, Report<ClusterError>>;

    /// Whether a custom-resource-definition with this name is installed.
    async fn crd_exists(&self, crd_name: &str) -> Result<bool, Report<ClusterError>>;
}
