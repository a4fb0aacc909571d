use std::collections::BTreeMap;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use kube::api::DynamicObject;

use crate::access::from_dynamic;
use crate::access::mirror::CacheMirror;
use crate::access::strategy::AccessStrategy;
use crate::access::strategy::CachedStrategy;
use crate::access::strategy::DirectStrategy;
use crate::access::AccessError;
use crate::access::AccessMode;
use crate::access::AccessibleResource;
use crate::access::ListQuery;
use crate::access::ResourceKind;
use crate::infrastructure::ClusterClient;
use crate::infrastructure::ClusterError;

/// Uniform read access to cluster objects.
///
/// The read strategy is fixed at construction. Every object handed out is an
/// owned copy; callers may mutate results freely.
pub struct ResourceAccessor {
    strategy: Box<dyn AccessStrategy>,
    client: Arc<dyn ClusterClient>,
    mirror: Option<Arc<CacheMirror>>,
}

impl ResourceAccessor {
    pub fn direct(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            strategy: Box::new(DirectStrategy::new(client.clone())),
            client,
            mirror: None,
        }
    }

    /// Reads kinds covered by `mirror` locally. The mirror should already be synchronized.
    pub fn cached(client: Arc<dyn ClusterClient>, mirror: Arc<CacheMirror>) -> Self {
        Self {
            strategy: Box::new(CachedStrategy::new(mirror.clone(), client.clone())),
            client,
            mirror: Some(mirror),
        }
    }

    pub fn mode(&self) -> AccessMode {
        self.strategy.mode()
    }

    pub fn mirror(&self) -> Option<&Arc<CacheMirror>> {
        self.mirror.as_ref()
    }

    /// Lists objects of `kind`. An empty or absent namespace lists all namespaces.
    ///
    /// # Errors
    ///
    /// - [`AccessError::SelectorParse`] if a selector is malformed
    /// - [`AccessError::Backend`] if the control plane request fails
    pub async fn list_dynamic(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<DynamicObject>, Report<AccessError>> {
        let query = ListQuery::parse(label_selector, field_selector)?;
        self.strategy
            .list(kind, namespace.filter(|ns| !ns.is_empty()), &query)
            .await
    }

    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the object does not exist
    /// - [`AccessError::Backend`] if the control plane request fails
    pub async fn get_dynamic(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, Report<AccessError>> {
        self.strategy.get(kind, namespace, name).await
    }

    /// Typed form of [`Self::list_dynamic`].
    ///
    /// # Errors
    ///
    /// As [`Self::list_dynamic`], plus [`AccessError::Conversion`] if an object does not decode.
    pub async fn list<K: AccessibleResource>(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<K>, Report<AccessError>> {
        self.list_dynamic(K::KIND, namespace, label_selector, field_selector)
            .await?
            .iter()
            .map(decode::<K>)
            .collect()
    }

    /// Typed form of [`Self::get_dynamic`].
    ///
    /// # Errors
    ///
    /// As [`Self::get_dynamic`], plus [`AccessError::Conversion`] if the object does not decode.
    pub async fn get<K: AccessibleResource>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<K, Report<AccessError>> {
        let object = self.get_dynamic(K::KIND, namespace, name).await?;
        decode(&object)
    }

    /// Deletes an object. Writes always go to the control plane.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the object does not exist
    /// - [`AccessError::Backend`] for any other failure
    pub async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Report<AccessError>> {
        self.client
            .delete(kind, namespace, name)
            .await
            .map_err(|report| translate(report, kind, namespace, name))
    }

    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if the object does not exist
    /// - [`AccessError::Backend`] if the patch is rejected
    pub async fn patch_labels(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<DynamicObject, Report<AccessError>> {
        self.client
            .patch_labels(kind, namespace, name, labels)
            .await
            .map_err(|report| translate(report, kind, namespace, name))
    }

    /// # Errors
    ///
    /// - [`AccessError::Probe`] if the definition cannot be read
    pub async fn crd_exists(&self, crd_name: &str) -> Result<bool, Report<AccessError>> {
        self.client
            .crd_exists(crd_name)
            .await
            .change_context(AccessError::Probe {
                crd_name: crd_name.to_string(),
            })
    }
}

fn translate(
    report: Report<ClusterError>,
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
) -> Report<AccessError> {
    if report.current_context().is_not_found() {
        report.change_context(AccessError::not_found(kind, namespace, name))
    } else {
        report.change_context(AccessError::backend(kind, namespace, name))
    }
}

fn decode<K: AccessibleResource>(object: &DynamicObject) -> Result<K, Report<AccessError>> {
    from_dynamic::<K>(object)
        .change_context(AccessError::Conversion { kind: K::KIND })
        .attach_printable_lazy(|| {
            format!(
                "object {}/{}",
                object.metadata.namespace.as_deref().unwrap_or_default(),
                object.metadata.name.as_deref().unwrap_or_default()
            )
        })
}
