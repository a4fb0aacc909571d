use api_types::JobStatus;
use api_types::ResourceRef;
use api_types::ResourceType;
use api_types::TrainingJobInfo;
use api_types::TrainingJobInstance;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use once_cell::sync::OnceCell;

use crate::training::chief::Members;
use crate::training::gpu;
use crate::training::pods;
use crate::training::status;
use crate::training::JobObject;
use crate::training::JobType;

const NOT_AVAILABLE: &str = "N/A";

/// A training job normalized across job types.
///
/// Built fresh for every query and never mutated afterwards; GPU counts are
/// computed on first access and kept for the lifetime of the value.
#[derive(Debug)]
pub struct TrainingJob {
    object: JobObject,
    members: Members,
    status: JobStatus,
    resources: Vec<ResourceRef>,
    requested_gpus: OnceCell<u64>,
    allocated_gpus: OnceCell<u64>,
}

impl TrainingJob {
    /// `associated` lists stateful sets and batch jobs; member pods are added here.
    pub fn new(object: JobObject, members: Members, associated: Vec<ResourceRef>) -> Self {
        let status = status::resolve_status(&object, members.chief());
        let mut resources: Vec<ResourceRef> = members
            .pods
            .iter()
            .map(|pod| ResourceRef {
                name: pod.metadata.name.clone().unwrap_or_default(),
                uid: pod.metadata.uid.clone().unwrap_or_default(),
                resource_type: ResourceType::Pod,
            })
            .collect();
        resources.extend(associated);

        Self {
            object,
            members,
            status,
            resources,
            requested_gpus: OnceCell::new(),
            allocated_gpus: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.object.name()
    }

    pub fn namespace(&self) -> &str {
        self.object.namespace()
    }

    pub fn uid(&self) -> &str {
        self.object.uid()
    }

    pub fn job_type(&self) -> JobType {
        self.object.job_type()
    }

    pub fn object(&self) -> &JobObject {
        &self.object
    }

    pub fn pods(&self) -> &[Pod] {
        &self.members.pods
    }

    pub fn chief(&self) -> Option<&Pod> {
        self.members.chief()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Status with running downgraded to pending while any member pod is pending.
    pub fn display_status(&self) -> JobStatus {
        status::display_status(self.status, &self.members.pods)
    }

    pub fn resources(&self) -> &[ResourceRef] {
        &self.resources
    }

    pub fn priority_class(&self) -> Option<&str> {
        self.object.priority_class()
    }

    pub fn requested_gpus(&self) -> u64 {
        *self
            .requested_gpus
            .get_or_init(|| gpu::requested_gpus(&self.members.pods))
    }

    pub fn allocated_gpus(&self) -> u64 {
        *self
            .allocated_gpus
            .get_or_init(|| gpu::allocated_gpus(&self.members.pods))
    }

    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.object.creation_timestamp().map(|t| t.0)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.object.start_time().map(|t| t.0)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        self.creation_timestamp()
            .map_or(Duration::zero(), |created| now - created)
    }

    /// Zero before the job starts; frozen at completion once it has one.
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        let Some(start) = self.start_time() else {
            return Duration::zero();
        };
        let end = self.object.completion_time().map_or(now, |t| t.0);
        (end - start).max(Duration::zero())
    }

    pub fn to_info(&self) -> TrainingJobInfo {
        self.to_info_at(Utc::now())
    }

    pub fn to_info_at(&self, now: DateTime<Utc>) -> TrainingJobInfo {
        let chief_name = self
            .chief()
            .and_then(|p| p.metadata.name.clone())
            .unwrap_or_default();
        let instances = self
            .members
            .pods
            .iter()
            .enumerate()
            .map(|(i, pod)| instance(pod, self.members.chief == Some(i), now))
            .collect();

        TrainingJobInfo {
            name: self.name().to_string(),
            namespace: self.namespace().to_string(),
            uid: self.uid().to_string(),
            status: self.display_status(),
            trainer: self.job_type().to_string(),
            duration: seconds(self.duration(now)),
            priority: self
                .priority_class()
                .unwrap_or(NOT_AVAILABLE)
                .to_string(),
            chief_name,
            instances,
            request_gpu: self.requested_gpus(),
            allocated_gpu: self.allocated_gpus(),
            creation_timestamp: self.creation_timestamp().map(|t| t.timestamp()),
        }
    }
}

fn instance(pod: &Pod, is_chief: bool, now: DateTime<Utc>) -> TrainingJobInstance {
    let created = pods::created_at(pod);
    let placed = |value: Option<&str>| {
        if pods::is_pending(pod) {
            NOT_AVAILABLE.to_string()
        } else {
            value.unwrap_or(NOT_AVAILABLE).to_string()
        }
    };

    TrainingJobInstance {
        name: pod.metadata.name.clone().unwrap_or_default(),
        status: pods::display_status(pod),
        age: seconds(created.map_or(Duration::zero(), |c| now - c)),
        node: placed(pods::node_name(pod)),
        node_ip: placed(pods::host_ip(pod)),
        is_chief,
        request_gpus: gpu::gpus_in_pod(pod),
        creation_timestamp: created.map(|t| t.timestamp()),
    }
}

fn seconds(duration: Duration) -> String {
    format!("{}s", duration.num_seconds().max(0))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::mock::test_job;
    use crate::mock::test_pod;
    use crate::mock::with_gpus;
    use crate::mock::with_start_time;
    use crate::training::chief::select_members;
    use crate::training::crds::ReplicatedJobStatus;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap()
    }

    fn pytorch_pod(name: &str, role: &str, phase: &str) -> Pod {
        test_pod(
            name,
            "ns",
            &[
                ("release", "pt"),
                ("app", "pytorchjob"),
                ("group-name", "kubeflow.org"),
                ("pytorch-replica-type", role),
            ],
            phase,
            Some("node-a"),
        )
    }

    fn running_job(pods: Vec<Pod>) -> TrainingJob {
        let JobObject::PyTorch(mut job) = test_job(JobType::PyTorchJob, "pt", "ns") else {
            unreachable!()
        };
        job.metadata.creation_timestamp = Some(Time(at(0)));
        job.status = Some(ReplicatedJobStatus {
            conditions: vec![crate::training::crds::JobCondition {
                type_: "Running".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }],
            start_time: Some(Time(at(1))),
            completion_time: None,
        });
        let object = JobObject::PyTorch(job);
        let members = select_members(&object, pods);
        TrainingJob::new(object, members, vec![])
    }

    #[test]
    fn gpu_counts_are_memoized() {
        let job = running_job(vec![
            with_start_time(with_gpus(pytorch_pod("pt-master-0", "master", "Running"), &[1])),
            with_start_time(with_gpus(pytorch_pod("pt-worker-0", "worker", "Running"), &[2])),
        ]);
        assert_eq!(job.requested_gpus(), 3);
        assert_eq!(job.requested_gpus(), 3);
        assert_eq!(job.allocated_gpus(), 3);
        assert_eq!(job.resources().len(), 2);
    }

    #[test]
    fn info_view() {
        let job = running_job(vec![
            pytorch_pod("pt-master-0", "master", "Running"),
            pytorch_pod("pt-worker-0", "worker", "Pending"),
        ]);
        assert_eq!(job.status(), JobStatus::Running);

        let info = job.to_info_at(at(3));
        assert_eq!(info.status, JobStatus::Pending);
        assert_eq!(info.trainer, "pytorchjob");
        assert_eq!(info.duration, "120s");
        assert_eq!(info.priority, "N/A");
        assert_eq!(info.chief_name, "pt-master-0");
        assert_eq!(info.instances.len(), 2);
        assert!(info.instances[0].is_chief);
        assert_eq!(info.instances[0].node, "node-a");
        assert_eq!(info.instances[1].node, "N/A");
        assert_eq!(info.creation_timestamp, Some(at(0).timestamp()));
    }

    #[test]
    fn duration_is_zero_before_start() {
        let JobObject::PyTorch(job) = test_job(JobType::PyTorchJob, "pt", "ns") else {
            unreachable!()
        };
        let object = JobObject::PyTorch(job);
        let job = TrainingJob::new(object, Members::default(), vec![]);
        assert_eq!(job.duration(at(5)), Duration::zero());
        assert_eq!(job.status(), JobStatus::Pending);
    }
}
