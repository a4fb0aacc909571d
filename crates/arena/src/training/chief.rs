use k8s_openapi::api::core::v1::Pod;

use crate::training::pods;
use crate::training::JobObject;

/// Member pods of one job and the chosen chief.
#[derive(Debug, Clone, Default)]
pub struct Members {
    /// Sorted by name.
    pub pods: Vec<Pod>,
    /// Index into `pods`.
    pub chief: Option<usize>,
}

impl Members {
    pub fn chief(&self) -> Option<&Pod> {
        self.chief.and_then(|i| self.pods.get(i))
    }
}

/// Keeps the candidates that belong to `job` and picks its chief.
///
/// A non-pending chief-role pod beats a pending one; between pods of equal
/// standing the most recently created wins, the first one on a tie.
pub fn select_members(job: &JobObject, candidates: impl IntoIterator<Item = Pod>) -> Members {
    let job_type = job.job_type();
    let mut pods: Vec<Pod> = candidates
        .into_iter()
        .filter(|pod| job_type.is_member_pod(job.name(), job.namespace(), pod))
        .collect();
    pods.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

    let mut chief: Option<usize> = None;
    for (i, pod) in pods.iter().enumerate() {
        if !job_type.is_chief_pod(job, pod) {
            continue;
        }
        chief = match chief {
            Some(current) if !replaces(pod, &pods[current]) => Some(current),
            _ => Some(i),
        };
    }

    Members { pods, chief }
}

fn replaces(candidate: &Pod, current: &Pod) -> bool {
    match (pods::is_pending(candidate), pods::is_pending(current)) {
        (false, true) => true,
        (true, false) => false,
        _ => pods::created_at(candidate) > pods::created_at(current),
    }
}
