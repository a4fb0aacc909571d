use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use kube::api::DynamicObject;
use serde::Deserialize;
use tracing::debug;

use crate::access::mirror::CacheMirror;
use crate::access::selector::FieldSelector;
use crate::access::selector::LabelSelector;
use crate::access::AccessError;
use crate::access::ResourceKind;
use crate::infrastructure::ClusterClient;

/// Where reads are served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Every read is a control-plane request.
    #[default]
    #[display("direct")]
    Direct,
    /// Reads are served from a watch-fed local mirror.
    #[display("cached")]
    Cached,
}

/// A list request with both the raw and the parsed form of its selectors.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    label_selector: String,
    field_selector: String,
    labels: LabelSelector,
    fields: FieldSelector,
}

impl ListQuery {
    /// # Errors
    ///
    /// - [`AccessError::SelectorParse`] if either selector is malformed
    pub fn parse(label_selector: &str, field_selector: &str) -> Result<Self, Report<AccessError>> {
        let labels = LabelSelector::parse(label_selector).change_context(AccessError::SelectorParse {
            selector: label_selector.to_string(),
        })?;
        let fields = FieldSelector::parse(field_selector).change_context(AccessError::SelectorParse {
            selector: field_selector.to_string(),
        })?;
        Ok(Self {
            label_selector: label_selector.trim().to_string(),
            field_selector: field_selector.trim().to_string(),
            labels,
            fields,
        })
    }

    pub fn label_selector(&self) -> &str {
        &self.label_selector
    }

    pub fn field_selector(&self) -> &str {
        &self.field_selector
    }

    pub fn fields(&self) -> &FieldSelector {
        &self.fields
    }

    pub fn matches(&self, object: &DynamicObject) -> bool {
        self.labels.matches_opt(object.metadata.labels.as_ref()) && self.fields.matches(object)
    }
}

/// Serves list/get reads for the accessor. Chosen once when the accessor is built.
#[async_trait::async_trait]
pub trait AccessStrategy: Send + Sync {
    fn mode(&self) -> AccessMode;

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Vec<DynamicObject>, Report<AccessError>>;

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, Report<AccessError>>;
}

/// Issues one control-plane call per read, selectors passed through verbatim.
pub struct DirectStrategy {
    client: Arc<dyn ClusterClient>,
}

impl DirectStrategy {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl AccessStrategy for DirectStrategy {
    fn mode(&self) -> AccessMode {
        AccessMode::Direct
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Vec<DynamicObject>, Report<AccessError>> {
        self.client
            .list(kind, namespace, query.label_selector(), query.field_selector())
            .await
            .change_context(AccessError::backend(kind, namespace, ""))
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, Report<AccessError>> {
        self.client
            .get(kind, namespace, name)
            .await
            .map_err(|report| {
                if report.current_context().is_not_found() {
                    report.change_context(AccessError::not_found(kind, namespace, name))
                } else {
                    report.change_context(AccessError::backend(kind, namespace, name))
                }
            })
    }
}

/// Serves mirrored kinds from the [`CacheMirror`], everything else directly.
pub struct CachedStrategy {
    mirror: Arc<CacheMirror>,
    fallback: DirectStrategy,
}

impl CachedStrategy {
    pub fn new(mirror: Arc<CacheMirror>, client: Arc<dyn ClusterClient>) -> Self {
        Self {
            mirror,
            fallback: DirectStrategy::new(client),
        }
    }
}

#[async_trait::async_trait]
impl AccessStrategy for CachedStrategy {
    fn mode(&self) -> AccessMode {
        AccessMode::Cached
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        query: &ListQuery,
    ) -> Result<Vec<DynamicObject>, Report<AccessError>> {
        if self.mirror.covers(kind) {
            return self.mirror.list(kind, namespace, query);
        }
        debug!(kind = %kind, "kind is not mirrored, reading from the cluster");
        self.fallback.list(kind, namespace, query).await
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, Report<AccessError>> {
        if self.mirror.covers(kind) {
            return self.mirror.get(kind, namespace, name);
        }
        debug!(kind = %kind, "kind is not mirrored, reading from the cluster");
        self.fallback.get(kind, namespace, name).await
    }
}
