use std::collections::BTreeMap;

use error_stack::Report;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;

use crate::access::from_dynamic;
use crate::access::AccessError;
use crate::access::ResourceAccessor;
use crate::training::crds::DeepSpeedJob;
use crate::training::crds::EtJob;
use crate::training::crds::JobCondition;
use crate::training::crds::MpiJob;
use crate::training::crds::PyTorchJob;
use crate::training::crds::ReplicaSpec;
use crate::training::crds::TfJob;
use crate::training::JobType;
use crate::training::StatusFamily;

static NO_LABELS: BTreeMap<String, String> = BTreeMap::new();
static NO_REPLICAS: BTreeMap<String, ReplicaSpec> = BTreeMap::new();

/// Lifecycle state as reported by the job's own custom resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedState {
    Pending,
    Running,
    Scaling,
    Succeeded,
    Failed,
    Unknown,
}

/// The backing custom resource of a training job.
#[derive(Debug, Clone)]
pub enum JobObject {
    Tf(TfJob),
    PyTorch(PyTorchJob),
    Mpi(MpiJob),
    Et(EtJob),
    DeepSpeed(DeepSpeedJob),
}

macro_rules! each {
    ($self:expr, $job:ident => $body:expr) => {
        match $self {
            JobObject::Tf($job) => $body,
            JobObject::PyTorch($job) => $body,
            JobObject::Mpi($job) => $body,
            JobObject::Et($job) => $body,
            JobObject::DeepSpeed($job) => $body,
        }
    };
}

impl JobObject {
    /// Reads the custom resource `name` of `job_type`.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] if it does not exist
    /// - any other accessor error unchanged
    pub async fn fetch(
        accessor: &ResourceAccessor,
        job_type: JobType,
        namespace: &str,
        name: &str,
    ) -> Result<Self, Report<AccessError>> {
        let object = accessor
            .get_dynamic(job_type.kind(), Some(namespace), name)
            .await?;
        Self::decode(job_type, &object)
    }

    /// Lists custom resources of `job_type`; `None` lists all namespaces.
    ///
    /// # Errors
    ///
    /// - any accessor error unchanged
    pub async fn list(
        accessor: &ResourceAccessor,
        job_type: JobType,
        namespace: Option<&str>,
    ) -> Result<Vec<Self>, Report<AccessError>> {
        accessor
            .list_dynamic(job_type.kind(), namespace, "", "")
            .await?
            .iter()
            .map(|object| Self::decode(job_type, object))
            .collect()
    }

    /// # Errors
    ///
    /// - [`AccessError::Conversion`] if the object does not decode as `job_type`
    pub fn decode(job_type: JobType, object: &DynamicObject) -> Result<Self, Report<AccessError>> {
        let conversion = |e: serde_json::Error| {
            Report::new(e).change_context(AccessError::Conversion {
                kind: job_type.kind(),
            })
        };
        Ok(match job_type {
            JobType::TfJob => Self::Tf(from_dynamic(object).map_err(conversion)?),
            JobType::PyTorchJob => Self::PyTorch(from_dynamic(object).map_err(conversion)?),
            JobType::MpiJob => Self::Mpi(from_dynamic(object).map_err(conversion)?),
            JobType::EtJob => Self::Et(from_dynamic(object).map_err(conversion)?),
            JobType::DeepSpeedJob => Self::DeepSpeed(from_dynamic(object).map_err(conversion)?),
        })
    }

    pub fn job_type(&self) -> JobType {
        match self {
            Self::Tf(_) => JobType::TfJob,
            Self::PyTorch(_) => JobType::PyTorchJob,
            Self::Mpi(_) => JobType::MpiJob,
            Self::Et(_) => JobType::EtJob,
            Self::DeepSpeed(_) => JobType::DeepSpeedJob,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        each!(self, job => &job.metadata)
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        self.metadata().uid.as_deref().unwrap_or_default()
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        self.metadata().labels.as_ref().unwrap_or(&NO_LABELS)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn creation_timestamp(&self) -> Option<&Time> {
        self.metadata().creation_timestamp.as_ref()
    }

    pub fn replica_specs(&self) -> &BTreeMap<String, ReplicaSpec> {
        match self {
            Self::Tf(job) => &job.spec.tf_replica_specs,
            Self::PyTorch(job) => &job.spec.pytorch_replica_specs,
            Self::Mpi(job) => &job.spec.mpi_replica_specs,
            Self::Et(job) => &job.spec.et_replica_specs,
            Self::DeepSpeed(job) => &job.spec.replica_specs,
        }
    }

    pub fn has_replica_type(&self, replica_type: &str) -> bool {
        self.replica_specs()
            .keys()
            .any(|k| k.eq_ignore_ascii_case(replica_type))
    }

    /// First non-empty priority class over the replica templates, in replica-type order.
    pub fn priority_class(&self) -> Option<&str> {
        self.replica_specs()
            .values()
            .filter_map(|spec| spec.template.spec.as_ref())
            .filter_map(|spec| spec.priority_class_name.as_deref())
            .find(|class| !class.is_empty())
    }

    fn conditions(&self) -> Option<&[JobCondition]> {
        let status = match self {
            Self::Tf(job) => job.status.as_ref(),
            Self::PyTorch(job) => job.status.as_ref(),
            Self::Mpi(job) => job.status.as_ref(),
            Self::Et(_) | Self::DeepSpeed(_) => return None,
        };
        Some(status.map(|s| s.conditions.as_slice()).unwrap_or_default())
    }

    fn phase(&self) -> Option<&str> {
        let status = match self {
            Self::Et(job) => job.status.as_ref(),
            Self::DeepSpeed(job) => job.status.as_ref(),
            _ => None,
        };
        status.and_then(|s| s.phase.as_deref())
    }

    /// When the job started running. Phase-based jobs fall back to the creation time.
    pub fn start_time(&self) -> Option<&Time> {
        let reported = match self {
            Self::Tf(job) => job.status.as_ref().and_then(|s| s.start_time.as_ref()),
            Self::PyTorch(job) => job.status.as_ref().and_then(|s| s.start_time.as_ref()),
            Self::Mpi(job) => job.status.as_ref().and_then(|s| s.start_time.as_ref()),
            Self::Et(job) => job.status.as_ref().and_then(|s| s.start_time.as_ref()),
            Self::DeepSpeed(job) => job.status.as_ref().and_then(|s| s.start_time.as_ref()),
        };
        match self.job_type().status_family() {
            StatusFamily::Conditions => reported,
            StatusFamily::Phase => reported.or(self.creation_timestamp()),
        }
    }

    pub fn completion_time(&self) -> Option<&Time> {
        match self {
            Self::Tf(job) => job.status.as_ref().and_then(|s| s.completion_time.as_ref()),
            Self::PyTorch(job) => job.status.as_ref().and_then(|s| s.completion_time.as_ref()),
            Self::Mpi(job) => job.status.as_ref().and_then(|s| s.completion_time.as_ref()),
            Self::Et(job) => job.status.as_ref().and_then(|s| s.completion_time.as_ref()),
            Self::DeepSpeed(job) => job.status.as_ref().and_then(|s| s.completion_time.as_ref()),
        }
    }

    /// The state the operator reports, before chief and annotation checks.
    pub fn reported_state(&self) -> ReportedState {
        if let Some(conditions) = self.conditions() {
            return latest_true_condition(conditions);
        }
        match self.phase() {
            Some("Succeeded") => ReportedState::Succeeded,
            Some("Failed") => ReportedState::Failed,
            Some("Scaling") => ReportedState::Scaling,
            _ => ReportedState::Running,
        }
    }
}

/// Newest condition first; a condition without an update time sorts before all others.
fn latest_true_condition(conditions: &[JobCondition]) -> ReportedState {
    let mut sorted: Vec<&JobCondition> = conditions.iter().collect();
    sorted.sort_by(|a, b| match (&a.last_update_time, &b.last_update_time) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(a), Some(b)) => b.0.cmp(&a.0),
    });

    let Some(condition) = sorted.into_iter().find(|c| c.status == "True") else {
        return ReportedState::Pending;
    };
    match condition.type_.as_str() {
        "Succeeded" => ReportedState::Succeeded,
        "Failed" => ReportedState::Failed,
        "Running" => ReportedState::Running,
        "Created" | "Restarting" | "Pending" => ReportedState::Pending,
        _ => ReportedState::Unknown,
    }
}
