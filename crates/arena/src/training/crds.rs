//! Custom resources of the supported training operators.
//!
//! Only the fields read by the trainers are modelled. Schemas are owned by the
//! operators, so schema generation is disabled.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use serde::Deserialize;
use serde::Serialize;

use crate::access::AccessibleResource;
use crate::access::ResourceKind;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSpec {
    #[serde(default, alias = "Replicas", skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub template: PodTemplateSpec,
}

/// Condition reported by the kubeflow operators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
}

/// Status of condition-based jobs (TF, PyTorch, MPI).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedJobStatus {
    #[serde(default)]
    pub conditions: Vec<JobCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,
}

/// Status of phase-based jobs (elastic training, DeepSpeed).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseJobStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kubeflow.org",
    version = "v1",
    kind = "TFJob",
    root = "TfJob",
    namespaced,
    status = "ReplicatedJobStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct TfJobSpec {
    #[serde(default)]
    pub tf_replica_specs: BTreeMap<String, ReplicaSpec>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kubeflow.org",
    version = "v1",
    kind = "PyTorchJob",
    namespaced,
    status = "ReplicatedJobStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PyTorchJobSpec {
    #[serde(default)]
    pub pytorch_replica_specs: BTreeMap<String, ReplicaSpec>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kubeflow.org",
    version = "v1",
    kind = "MPIJob",
    root = "MpiJob",
    namespaced,
    status = "ReplicatedJobStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MpiJobSpec {
    #[serde(default)]
    pub mpi_replica_specs: BTreeMap<String, ReplicaSpec>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kai.alibabacloud.com",
    version = "v1alpha1",
    kind = "TrainingJob",
    root = "EtJob",
    namespaced,
    status = "PhaseJobStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct EtJobSpec {
    #[serde(default)]
    pub et_replica_specs: BTreeMap<String, ReplicaSpec>,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kai.alibabacloud.com",
    version = "v1alpha1",
    kind = "DeepSpeedJob",
    namespaced,
    status = "PhaseJobStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct DeepSpeedJobSpec {
    #[serde(default, rename = "etReplicaSpecs")]
    pub replica_specs: BTreeMap<String, ReplicaSpec>,
}

impl AccessibleResource for TfJob {
    const KIND: ResourceKind = ResourceKind::TfJob;
}

impl AccessibleResource for PyTorchJob {
    const KIND: ResourceKind = ResourceKind::PyTorchJob;
}

impl AccessibleResource for MpiJob {
    const KIND: ResourceKind = ResourceKind::MpiJob;
}

impl AccessibleResource for EtJob {
    const KIND: ResourceKind = ResourceKind::EtJob;
}

impl AccessibleResource for DeepSpeedJob {
    const KIND: ResourceKind = ResourceKind::DeepSpeedJob;
}
