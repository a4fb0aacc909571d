use std::collections::BTreeMap;
use std::str::FromStr;

use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use serde::Serialize;

use crate::access::ResourceKind;
use crate::training::JobObject;

pub const RELEASE_LABEL: &str = "release";
pub const APP_LABEL: &str = "app";
pub const GROUP_NAME_LABEL: &str = "group-name";
pub const LEGACY_GROUP_NAME_LABEL: &str = "group_name";
pub const OPERATOR_NAME_LABEL: &str = "training.kubeflow.org/operator-name";
pub const CREATED_BY_LABEL: &str = "createdBy";
pub const TF_JOB_NAME_LABEL: &str = "tf-job-name";
pub const TF_REPLICA_TYPE_LABEL: &str = "tf-replica-type";
pub const TF_REPLICA_INDEX_LABEL: &str = "tf-replica-index";
pub const PYTORCH_REPLICA_TYPE_LABEL: &str = "pytorch-replica-type";
pub const MPI_ROLE_LABEL: &str = "mpi_role_type";
pub const TRAINING_JOB_ROLE_LABEL: &str = "training-job-role";

const KUBEFLOW_GROUP: &str = "kubeflow.org";
const KAI_GROUP: &str = "kai.alibabacloud.com";

/// How a job type reports its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFamily {
    /// A list of typed conditions with timestamps.
    Conditions,
    /// A single `status.phase` string.
    Phase,
}

/// Supported training job types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    #[display("tfjob")]
    #[value(name = "tfjob")]
    TfJob,
    #[display("pytorchjob")]
    #[value(name = "pytorchjob")]
    PyTorchJob,
    #[display("mpijob")]
    #[value(name = "mpijob")]
    MpiJob,
    #[display("etjob")]
    #[value(name = "etjob")]
    EtJob,
    #[display("deepspeedjob")]
    #[value(name = "deepspeedjob")]
    DeepSpeedJob,
}

#[derive(Debug, derive_more::Display)]
#[display("unknown job type `{_0}`")]
pub struct UnknownJobType(String);

impl core::error::Error for UnknownJobType {}

impl FromStr for JobType {
    type Err = UnknownJobType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.tag() == s)
            .ok_or_else(|| UnknownJobType(s.to_string()))
    }
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        Self::TfJob,
        Self::PyTorchJob,
        Self::MpiJob,
        Self::EtJob,
        Self::DeepSpeedJob,
    ];

    /// The tag used in `app` labels and on the command line.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::TfJob => "tfjob",
            Self::PyTorchJob => "pytorchjob",
            Self::MpiJob => "mpijob",
            Self::EtJob => "etjob",
            Self::DeepSpeedJob => "deepspeedjob",
        }
    }

    pub const fn kind(self) -> ResourceKind {
        match self {
            Self::TfJob => ResourceKind::TfJob,
            Self::PyTorchJob => ResourceKind::PyTorchJob,
            Self::MpiJob => ResourceKind::MpiJob,
            Self::EtJob => ResourceKind::EtJob,
            Self::DeepSpeedJob => ResourceKind::DeepSpeedJob,
        }
    }

    /// Name of the custom-resource-definition, `<plural>.<group>`.
    pub fn crd_name(self) -> String {
        let kind = self.kind();
        format!("{}.{}", kind.plural(), kind.group())
    }

    pub const fn status_family(self) -> StatusFamily {
        match self {
            Self::TfJob | Self::PyTorchJob | Self::MpiJob => StatusFamily::Conditions,
            Self::EtJob | Self::DeepSpeedJob => StatusFamily::Phase,
        }
    }

    /// Label selector for candidate pods of this type; membership is decided by
    /// [`Self::is_member_pod`].
    pub fn pod_selector(self) -> String {
        format!("{APP_LABEL}={}", self.tag())
    }

    /// Label that links stateful sets and batch jobs to a job of this type.
    pub const fn associated_label(self) -> Option<&'static str> {
        match self {
            Self::TfJob => None,
            Self::PyTorchJob => Some("pytorch_job_name"),
            Self::MpiJob => Some("mpi_job_name"),
            Self::EtJob | Self::DeepSpeedJob => Some("training-job-name"),
        }
    }

    /// Whether the custom resource itself belongs to a job called `name` in `namespace`.
    pub fn is_owned_job(self, name: &str, namespace: &str, job: &JobObject) -> bool {
        if job.namespace() != namespace {
            return false;
        }
        if self == Self::TfJob {
            return true;
        }
        let labels = job.labels();
        label_is(labels, RELEASE_LABEL, name) && label_is(labels, APP_LABEL, self.tag())
    }

    /// Whether `pod` belongs to the job called `name` in `namespace`.
    pub fn is_member_pod(self, name: &str, namespace: &str, pod: &Pod) -> bool {
        if pod.metadata.namespace.as_deref() != Some(namespace) {
            return false;
        }
        let empty = BTreeMap::new();
        let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);
        if !label_is(labels, APP_LABEL, self.tag()) {
            return false;
        }

        let release_key = if self == Self::TfJob && label_is(labels, CREATED_BY_LABEL, "Cron") {
            TF_JOB_NAME_LABEL
        } else {
            RELEASE_LABEL
        };
        if !label_is(labels, release_key, name) {
            return false;
        }

        match self {
            Self::TfJob => {
                label_is(labels, GROUP_NAME_LABEL, KUBEFLOW_GROUP)
                    || label_is(labels, LEGACY_GROUP_NAME_LABEL, KUBEFLOW_GROUP)
                    || label_is(labels, OPERATOR_NAME_LABEL, "tfjob-controller")
            }
            Self::PyTorchJob => {
                label_is(labels, GROUP_NAME_LABEL, KUBEFLOW_GROUP)
                    || label_is(labels, OPERATOR_NAME_LABEL, "pytorchjob-controller")
            }
            Self::MpiJob => label_is(labels, LEGACY_GROUP_NAME_LABEL, KUBEFLOW_GROUP),
            Self::EtJob | Self::DeepSpeedJob => label_is(labels, GROUP_NAME_LABEL, KAI_GROUP),
        }
    }

    /// Whether `pod` plays the chief role. Only meaningful for member pods.
    pub fn is_chief_pod(self, job: &JobObject, pod: &Pod) -> bool {
        let empty = BTreeMap::new();
        let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);
        match self {
            Self::TfJob if job.has_replica_type("Chief") => {
                label_is(labels, TF_REPLICA_TYPE_LABEL, "chief")
            }
            Self::TfJob => {
                label_is(labels, TF_REPLICA_TYPE_LABEL, "worker")
                    && label_is(labels, TF_REPLICA_INDEX_LABEL, "0")
            }
            Self::PyTorchJob => label_is(labels, PYTORCH_REPLICA_TYPE_LABEL, "master"),
            Self::MpiJob => label_is(labels, MPI_ROLE_LABEL, "launcher"),
            Self::EtJob | Self::DeepSpeedJob => label_is(labels, TRAINING_JOB_ROLE_LABEL, "launcher"),
        }
    }

    /// Whether an associated stateful set or batch job with `labels` belongs to job `name`.
    pub fn is_associated(self, name: &str, labels: Option<&BTreeMap<String, String>>, batch: bool) -> bool {
        let Some(key) = self.associated_label() else {
            return false;
        };
        let Some(value) = labels.and_then(|l| l.get(key)) else {
            return false;
        };
        value == name || (batch && self == Self::MpiJob && *value == format!("{name}-mpijob"))
    }
}

fn label_is(labels: &BTreeMap<String, String>, key: &str, expected: &str) -> bool {
    labels.get(key).is_some_and(|v| v == expected)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::mock::test_job;
    use crate::mock::test_pod;
    use crate::training::crds::ReplicaSpec;
    use crate::training::select_members;

    #[test]
    fn tags_round_trip_through_from_str() {
        for job_type in JobType::ALL {
            assert_eq!(job_type.tag().parse::<JobType>().unwrap(), job_type);
            assert_eq!(job_type.to_string(), job_type.tag());
        }
        assert!("horovod".parse::<JobType>().is_err());
    }

    #[test]
    fn crd_names() {
        assert_eq!(JobType::TfJob.crd_name(), "tfjobs.kubeflow.org");
        assert_eq!(JobType::EtJob.crd_name(), "trainingjobs.kai.alibabacloud.com");
        assert_eq!(JobType::DeepSpeedJob.crd_name(), "deepspeedjobs.kai.alibabacloud.com");
    }

    #[test]
    fn tf_membership_accepts_any_group_label() {
        for group in [
            (GROUP_NAME_LABEL, KUBEFLOW_GROUP),
            (LEGACY_GROUP_NAME_LABEL, KUBEFLOW_GROUP),
            (OPERATOR_NAME_LABEL, "tfjob-controller"),
        ] {
            let pod = test_pod("p", "ns", &[("release", "train"), ("app", "tfjob"), group], "Running", None);
            assert!(JobType::TfJob.is_member_pod("train", "ns", &pod), "{group:?}");
            assert!(!JobType::TfJob.is_member_pod("train", "other", &pod));
            assert!(!JobType::TfJob.is_member_pod("other", "ns", &pod));
            assert!(!JobType::PyTorchJob.is_member_pod("train", "ns", &pod));
        }
    }

    #[test]
    fn tf_cron_pods_use_job_name_label() {
        let pod = test_pod(
            "p",
            "ns",
            &[
                ("createdBy", "Cron"),
                ("tf-job-name", "train-1700"),
                ("release", "train"),
                ("app", "tfjob"),
                ("group-name", "kubeflow.org"),
            ],
            "Running",
            None,
        );
        assert!(JobType::TfJob.is_member_pod("train-1700", "ns", &pod));
        assert!(!JobType::TfJob.is_member_pod("train", "ns", &pod));
    }

    #[test]
    fn mpi_requires_legacy_group_label() {
        let labels = [("release", "m"), ("app", "mpijob"), ("group-name", "kubeflow.org")];
        let pod = test_pod("p", "ns", &labels, "Running", None);
        assert!(!JobType::MpiJob.is_member_pod("m", "ns", &pod));

        let labels = [("release", "m"), ("app", "mpijob"), ("group_name", "kubeflow.org")];
        let pod = test_pod("p", "ns", &labels, "Running", None);
        assert!(JobType::MpiJob.is_member_pod("m", "ns", &pod));
    }

    fn tf_pod(name: &str, replica_type: &str, index: &str) -> Pod {
        test_pod(
            name,
            "ns",
            &[
                ("release", "train"),
                ("app", "tfjob"),
                ("group-name", "kubeflow.org"),
                ("tf-replica-type", replica_type),
                ("tf-replica-index", index),
            ],
            "Running",
            Some("node-1"),
        )
    }

    #[test]
    fn tf_chief_replica_takes_the_chief_role() {
        let JobObject::Tf(mut job) = test_job(JobType::TfJob, "train", "ns") else {
            unreachable!()
        };
        job.spec.tf_replica_specs = BTreeMap::from([
            ("Chief".to_string(), ReplicaSpec::default()),
            ("Worker".to_string(), ReplicaSpec::default()),
        ]);
        let with_chief = JobObject::Tf(job);
        let chief = tf_pod("train-chief-0", "chief", "0");
        let worker = tf_pod("train-worker-0", "worker", "0");

        assert!(JobType::TfJob.is_chief_pod(&with_chief, &chief));
        assert!(!JobType::TfJob.is_chief_pod(&with_chief, &worker));
        let members = select_members(&with_chief, [worker.clone(), chief.clone()]);
        assert_eq!(
            members.chief().and_then(|pod| pod.metadata.name.as_deref()),
            Some("train-chief-0")
        );

        // without a chief replica, worker 0 leads
        let workers_only = test_job(JobType::TfJob, "train", "ns");
        assert!(JobType::TfJob.is_chief_pod(&workers_only, &worker));
        assert!(!JobType::TfJob.is_chief_pod(&workers_only, &tf_pod("train-worker-1", "worker", "1")));
        let members = select_members(&workers_only, [worker, chief]);
        assert_eq!(
            members.chief().and_then(|pod| pod.metadata.name.as_deref()),
            Some("train-worker-0")
        );
    }

    #[test]
    fn mpi_batch_jobs_accept_suffixed_name() {
        let labels = BTreeMap::from([("mpi_job_name".to_string(), "m-mpijob".to_string())]);
        assert!(JobType::MpiJob.is_associated("m", Some(&labels), true));
        assert!(!JobType::MpiJob.is_associated("m", Some(&labels), false));
        assert!(!JobType::TfJob.is_associated("m", Some(&labels), true));
    }
}
