//! Shared API type definitions
//!
//! This crate contains the serializable views of training jobs handed to
//! renderers and API layers: the job status vocabulary, the job summary with
//! its instances, and references to the lower-level resources a job owns.

use serde::Deserialize;
use serde::Serialize;

/// Lifecycle status shared by every training job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    #[display("UNKNOWN")]
    Unknown,
    #[display("PENDING")]
    Pending,
    #[display("SCALING")]
    Scaling,
    #[display("RUNNING")]
    Running,
    #[display("SUCCEEDED")]
    Succeeded,
    #[display("FAILED")]
    Failed,
    #[display("MAX_WAIT_TIME_EXCEEDED")]
    MaxWaitTimeExceeded,
}

impl JobStatus {
    /// Whether the job reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::MaxWaitTimeExceeded
        )
    }
}

/// Kind of a lower-level resource associated with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
pub enum ResourceType {
    Pod,
    StatefulSet,
    Job,
}

/// Reference to a resource owned by a training job, used for event correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub name: String,
    pub uid: String,
    pub resource_type: ResourceType,
}

/// Training job summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJobInfo {
    /// Job name
    pub name: String,
    /// Job namespace
    pub namespace: String,
    /// Unique identifier of the job's custom resource
    pub uid: String,
    /// Job status, pending-corrected
    pub status: JobStatus,
    /// Job type tag, e.g. `tfjob`
    pub trainer: String,
    /// Running time, e.g. `120s`
    pub duration: String,
    /// Priority class name, `N/A` when unset
    pub priority: String,
    /// Name of the chief instance, empty when there is none
    pub chief_name: String,
    pub instances: Vec<TrainingJobInstance>,
    pub request_gpu: u64,
    pub allocated_gpu: u64,
    /// Creation time in unix seconds
    pub creation_timestamp: Option<i64>,
}

/// One pod of a training job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingJobInstance {
    pub name: String,
    /// Pod display status, e.g. `Running` or `Init:0/1`
    pub status: String,
    /// Age, e.g. `42s`
    pub age: String,
    pub node: String,
    #[serde(rename = "nodeIP")]
    pub node_ip: String,
    #[serde(rename = "chief")]
    pub is_chief: bool,
    pub request_gpus: u64,
    pub creation_timestamp: Option<i64>,
}
