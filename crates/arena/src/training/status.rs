use api_types::JobStatus;
use k8s_openapi::api::core::v1::Pod;

use crate::training::pods;
use crate::training::JobObject;
use crate::training::ReportedState;

/// Annotation set by the job supervisor when a job gave up waiting for resources.
pub const JOB_SUPERVISOR_STATUS_ANNOTATION: &str = "job-supervisor.kube-ai.io/job-status";
pub const MAX_WAIT_TIMEOUT_VALUE: &str = "timeout";

/// Derives the job status from the custom resource and the selected chief.
pub fn resolve_status(job: &JobObject, chief: Option<&Pod>) -> JobStatus {
    if job.name().is_empty() {
        return JobStatus::Unknown;
    }

    let reported = job.reported_state();
    match reported {
        ReportedState::Succeeded => return JobStatus::Succeeded,
        ReportedState::Failed if max_wait_time_exceeded(job) => {
            return JobStatus::MaxWaitTimeExceeded;
        }
        ReportedState::Failed => return JobStatus::Failed,
        _ => {}
    }

    if chief.map_or(true, pods::is_pending) {
        return JobStatus::Pending;
    }

    match reported {
        ReportedState::Scaling => JobStatus::Scaling,
        ReportedState::Pending => JobStatus::Pending,
        ReportedState::Running => JobStatus::Running,
        _ => JobStatus::Unknown,
    }
}

fn max_wait_time_exceeded(job: &JobObject) -> bool {
    job.annotation(JOB_SUPERVISOR_STATUS_ANNOTATION) == Some(MAX_WAIT_TIMEOUT_VALUE)
}

/// Status as presented: a running job with any pending member shows as pending.
pub fn display_status(status: JobStatus, members: &[Pod]) -> JobStatus {
    if status == JobStatus::Running && members.iter().any(pods::is_pending) {
        JobStatus::Pending
    } else {
        status
    }
}
