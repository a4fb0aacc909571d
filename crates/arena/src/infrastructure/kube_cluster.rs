use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::PoisonError;
use std::sync::RwLock;

use error_stack::Report;
use futures::StreamExt;
use futures::TryStreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::ApiResource;
use kube::api::DeleteParams;
use kube::api::DynamicObject;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::discovery;
use kube::runtime::watcher;
use kube::Api;
use kube::Client;
use tracing::debug;
use tracing::warn;

use crate::access::ResourceKind;
use crate::infrastructure::cluster::ClusterClient;
use crate::infrastructure::cluster::ClusterError;
use crate::infrastructure::cluster::WatchStream;

/// [`ClusterClient`] backed by a live API server.
///
/// Kinds are mapped to API resources through discovery on first use. When
/// discovery fails the statically known mapping is used instead and a warning
/// is logged; custom kinds served under an unexpected version will then fail
/// at request time.
pub struct KubeClusterClient {
    client: Client,
    resources: RwLock<HashMap<ResourceKind, ApiResource>>,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    async fn api_resource(&self, kind: ResourceKind) -> ApiResource {
        let cached = self
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned();
        if let Some(resource) = cached {
            return resource;
        }

        let resource = match discovery::pinned_kind(&self.client, &kind.gvk()).await {
            Ok((resource, _capabilities)) => resource,
            Err(e) => {
                warn!(kind = %kind, error = %e, "API discovery failed, falling back to the default resource mapping");
                kind.api_resource()
            }
        };

        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, resource.clone());
        resource
    }

    async fn api(&self, kind: ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = self.api_resource(kind).await;
        match namespace.filter(|ns| kind.is_namespaced() && !ns.is_empty()) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

fn request_error(
    kind: ResourceKind,
    namespace: Option<&str>,
    name: &str,
    err: kube::Error,
) -> Report<ClusterError> {
    let namespace = namespace.unwrap_or_default().to_string();
    match err {
        kube::Error::Api(response) if response.code == 404 => Report::new(ClusterError::NotFound {
            kind,
            namespace,
            name: name.to_string(),
        })
        .attach_printable(response.message),
        other => Report::new(ClusterError::RequestFailed {
            message: format!("{kind} {namespace}/{name}: {other}"),
        }),
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeClusterClient {
    #[tracing::instrument(skip(self))]
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<DynamicObject>, Report<ClusterError>> {
        let api = self.api(kind, namespace).await;
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        if !field_selector.is_empty() {
            params = params.fields(field_selector);
        }

        let list = api
            .list(&params)
            .await
            .map_err(|e| request_error(kind, namespace, "", e))?;
        debug!(count = list.items.len(), "listed objects");
        Ok(list.items)
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, Report<ClusterError>> {
        self.api(kind, namespace)
            .await
            .get(name)
            .await
            .map_err(|e| request_error(kind, namespace, name, e))
    }

    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, Report<ClusterError>> {
        let api = self.api(kind, None).await;
        let stream = watcher::watcher(api, watcher::Config::default())
            .map_err(move |e| {
                Report::new(ClusterError::WatchFailed {
                    kind,
                    message: e.to_string(),
                })
            })
            .boxed();
        Ok(stream)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Report<ClusterError>> {
        self.api(kind, namespace)
            .await
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| request_error(kind, namespace, name, e))
    }

    #[tracing::instrument(skip(self, labels))]
    async fn patch_labels(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<DynamicObject, Report<ClusterError>> {
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        self.api(kind, namespace)
            .await
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| request_error(kind, namespace, name, e))
    }

    async fn crd_exists(&self, crd_name: &str) -> Result<bool, Report<ClusterError>> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        match crds.get(crd_name).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
            Err(e) => Err(Report::new(ClusterError::RequestFailed {
                message: format!("failed to read CRD {crd_name}: {e}"),
            })),
        }
    }
}
