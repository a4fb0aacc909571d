use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Service;
use kube::api::ApiResource;
use kube::api::DynamicObject;
use kube::api::GroupVersionKind;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Every resource kind the accessor knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ResourceKind {
    Pod,
    BatchJob,
    StatefulSet,
    Deployment,
    Service,
    ConfigMap,
    Node,
    TfJob,
    PyTorchJob,
    MpiJob,
    EtJob,
    DeepSpeedJob,
}

impl ResourceKind {
    pub const BUILTIN: [ResourceKind; 7] = [
        Self::Pod,
        Self::BatchJob,
        Self::StatefulSet,
        Self::Deployment,
        Self::Service,
        Self::ConfigMap,
        Self::Node,
    ];

    pub const fn group(self) -> &'static str {
        match self {
            Self::Pod | Self::Service | Self::ConfigMap | Self::Node => "",
            Self::BatchJob => "batch",
            Self::StatefulSet | Self::Deployment => "apps",
            Self::TfJob | Self::PyTorchJob | Self::MpiJob => "kubeflow.org",
            Self::EtJob | Self::DeepSpeedJob => "kai.alibabacloud.com",
        }
    }

    pub const fn version(self) -> &'static str {
        match self {
            Self::EtJob | Self::DeepSpeedJob => "v1alpha1",
            _ => "v1",
        }
    }

    /// Kind name as served by the API.
    pub const fn api_kind(self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::BatchJob => "Job",
            Self::StatefulSet => "StatefulSet",
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::ConfigMap => "ConfigMap",
            Self::Node => "Node",
            Self::TfJob => "TFJob",
            Self::PyTorchJob => "PyTorchJob",
            Self::MpiJob => "MPIJob",
            Self::EtJob => "TrainingJob",
            Self::DeepSpeedJob => "DeepSpeedJob",
        }
    }

    pub const fn plural(self) -> &'static str {
        match self {
            Self::Pod => "pods",
            Self::BatchJob => "jobs",
            Self::StatefulSet => "statefulsets",
            Self::Deployment => "deployments",
            Self::Service => "services",
            Self::ConfigMap => "configmaps",
            Self::Node => "nodes",
            Self::TfJob => "tfjobs",
            Self::PyTorchJob => "pytorchjobs",
            Self::MpiJob => "mpijobs",
            Self::EtJob => "trainingjobs",
            Self::DeepSpeedJob => "deepspeedjobs",
        }
    }

    pub const fn is_namespaced(self) -> bool {
        !matches!(self, Self::Node)
    }

    pub fn gvk(self) -> GroupVersionKind {
        GroupVersionKind::gvk(self.group(), self.version(), self.api_kind())
    }

    /// The statically known API mapping, used when discovery is unavailable.
    pub fn api_resource(self) -> ApiResource {
        let api_version = if self.group().is_empty() {
            self.version().to_string()
        } else {
            format!("{}/{}", self.group(), self.version())
        };
        ApiResource {
            group: self.group().to_string(),
            version: self.version().to_string(),
            api_version,
            kind: self.api_kind().to_string(),
            plural: self.plural().to_string(),
        }
    }
}

/// A typed resource that can be read through the accessor.
pub trait AccessibleResource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: ResourceKind;
}

macro_rules! accessible {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(impl AccessibleResource for $ty {
            const KIND: ResourceKind = ResourceKind::$kind;
        })*
    };
}

accessible! {
    Pod => Pod,
    Job => BatchJob,
    StatefulSet => StatefulSet,
    Deployment => Deployment,
    Service => Service,
    ConfigMap => ConfigMap,
    Node => Node,
}

/// Converts a dynamic object into its typed form.
///
/// The conversion goes through an owned JSON value, so the result never shares
/// state with the source object.
pub fn from_dynamic<K: AccessibleResource>(object: &DynamicObject) -> Result<K, serde_json::Error> {
    serde_json::to_value(object).and_then(serde_json::from_value)
}

/// Converts a typed resource into a dynamic object.
pub fn to_dynamic<K: AccessibleResource>(resource: &K) -> Result<DynamicObject, serde_json::Error> {
    serde_json::to_value(resource).and_then(serde_json::from_value)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn api_resource_for_core_and_custom_kinds() {
        let pods = ResourceKind::Pod.api_resource();
        assert_eq!(pods.api_version, "v1");
        assert_eq!(pods.plural, "pods");

        let et = ResourceKind::EtJob.api_resource();
        assert_eq!(et.api_version, "kai.alibabacloud.com/v1alpha1");
        assert_eq!(et.kind, "TrainingJob");
    }

    #[test]
    fn only_nodes_are_cluster_scoped() {
        assert!(!ResourceKind::Node.is_namespaced());
        assert!(ResourceKind::Pod.is_namespaced());
        assert!(ResourceKind::TfJob.is_namespaced());
    }

    #[test]
    fn dynamic_conversion_keeps_metadata_and_spec() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("worker-0".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node-a".to_string()),
                ..Default::default()
            }),
            status: None,
        };

        let dynamic = to_dynamic(&pod).unwrap();
        assert_eq!(dynamic.metadata.name.as_deref(), Some("worker-0"));
        assert_eq!(dynamic.data["spec"]["nodeName"], serde_json::json!("node-a"));

        let back: Pod = from_dynamic(&dynamic).unwrap();
        assert_eq!(back, pod);
    }
}
