//! Pod phase helpers and the human-readable pod status.

use chrono::DateTime;
use chrono::Utc;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Pod;

pub fn phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or_default()
}

pub fn is_pending(pod: &Pod) -> bool {
    phase(pod) == "Pending"
}

/// Succeeded, failed, or on its way out.
pub fn is_completed(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some() || matches!(phase(pod), "Succeeded" | "Failed")
}

pub fn created_at(pod: &Pod) -> Option<DateTime<Utc>> {
    pod.metadata.creation_timestamp.as_ref().map(|t| t.0)
}

pub fn node_name(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref().and_then(|s| s.node_name.as_deref())
}

pub fn host_ip(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.host_ip.as_deref())
}

/// Status string as shown to users: the phase or reason refined by container states.
pub fn display_status(pod: &Pod) -> String {
    let status = pod.status.as_ref();
    let mut reason = status
        .and_then(|s| s.reason.clone())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| phase(pod).to_string());

    let init_containers = pod
        .spec
        .as_ref()
        .and_then(|s| s.init_containers.as_ref())
        .map_or(0, Vec::len);
    let init_statuses = status
        .and_then(|s| s.init_container_statuses.as_deref())
        .unwrap_or_default();

    let mut initializing = false;
    for (i, container) in init_statuses.iter().enumerate() {
        if let Some(init_reason) = init_container_reason(i, init_containers, container) {
            reason = init_reason;
            initializing = true;
            break;
        }
    }

    if !initializing {
        let statuses = status
            .and_then(|s| s.container_statuses.as_deref())
            .unwrap_or_default();
        let mut has_running = false;
        for container in statuses.iter().rev() {
            let state = container.state.as_ref();
            let waiting = state.and_then(|s| s.waiting.as_ref());
            let terminated = state.and_then(|s| s.terminated.as_ref());

            if let Some(r) = waiting.and_then(|w| w.reason.as_deref()).filter(|r| !r.is_empty()) {
                reason = r.to_string();
            } else if let Some(t) = terminated {
                reason = match t.reason.as_deref().filter(|r| !r.is_empty()) {
                    Some(r) => r.to_string(),
                    None => exit_reason("", t.signal, t.exit_code),
                };
            } else if container.ready && state.is_some_and(|s| s.running.is_some()) {
                has_running = true;
            }
        }
        if reason == "Completed" && has_running {
            reason = "Running".to_string();
        }
    }

    if pod.metadata.deletion_timestamp.is_some() {
        let node_lost = status.and_then(|s| s.reason.as_deref()) == Some("NodeLost");
        reason = if node_lost { "Unknown" } else { "Terminating" }.to_string();
    }
    reason
}

fn init_container_reason(index: usize, total: usize, container: &ContainerStatus) -> Option<String> {
    let state = container.state.as_ref();
    if let Some(terminated) = state.and_then(|s| s.terminated.as_ref()) {
        if terminated.exit_code == 0 {
            return None;
        }
        return Some(match terminated.reason.as_deref().filter(|r| !r.is_empty()) {
            Some(r) => format!("Init:{r}"),
            None => exit_reason("Init:", terminated.signal, terminated.exit_code),
        });
    }
    if let Some(r) = state
        .and_then(|s| s.waiting.as_ref())
        .and_then(|w| w.reason.as_deref())
        .filter(|r| !r.is_empty() && *r != "PodInitializing")
    {
        return Some(format!("Init:{r}"));
    }
    Some(format!("Init:{index}/{total}"))
}

fn exit_reason(prefix: &str, signal: Option<i32>, exit_code: i32) -> String {
    match signal.filter(|s| *s != 0) {
        Some(signal) => format!("{prefix}Signal:{signal}"),
        None => format!("{prefix}ExitCode:{exit_code}"),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ContainerState;
    use k8s_openapi::api::core::v1::ContainerStateRunning;
    use k8s_openapi::api::core::v1::ContainerStateTerminated;
    use k8s_openapi::api::core::v1::ContainerStateWaiting;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::mock::test_pod;

    fn container(name: &str, state: ContainerState, ready: bool) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            ready,
            state: Some(state),
            ..Default::default()
        }
    }

    fn waiting(reason: &str) -> ContainerState {
        ContainerState {
            waiting: Some(ContainerStateWaiting {
                reason: Some(reason.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn terminated(reason: Option<&str>, exit_code: i32, signal: Option<i32>) -> ContainerState {
        ContainerState {
            terminated: Some(ContainerStateTerminated {
                reason: reason.map(str::to_string),
                exit_code,
                signal,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn running() -> ContainerState {
        ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }
    }

    fn with_containers(mut pod: Pod, init: Vec<ContainerStatus>, main: Vec<ContainerStatus>) -> Pod {
        let status = pod.status.get_or_insert_with(Default::default);
        status.init_container_statuses = Some(init);
        status.container_statuses = Some(main);
        pod
    }

    #[test]
    fn plain_phase() {
        assert_eq!(display_status(&test_pod("p", "ns", &[], "Running", None)), "Running");
    }

    #[test]
    fn waiting_and_terminated_reasons() {
        let pod = with_containers(
            test_pod("p", "ns", &[], "Pending", None),
            vec![],
            vec![container("main", waiting("ImagePullBackOff"), false)],
        );
        assert_eq!(display_status(&pod), "ImagePullBackOff");

        let pod = with_containers(
            test_pod("p", "ns", &[], "Failed", None),
            vec![],
            vec![container("main", terminated(None, 137, Some(9)), false)],
        );
        assert_eq!(display_status(&pod), "Signal:9");

        let pod = with_containers(
            test_pod("p", "ns", &[], "Failed", None),
            vec![],
            vec![container("main", terminated(None, 2, None), false)],
        );
        assert_eq!(display_status(&pod), "ExitCode:2");
    }

    #[test]
    fn init_container_states() {
        let pod = with_containers(
            test_pod("p", "ns", &[], "Pending", None),
            vec![container("init", terminated(None, 1, None), false)],
            vec![],
        );
        assert_eq!(display_status(&pod), "Init:ExitCode:1");

        let pod = with_containers(
            test_pod("p", "ns", &[], "Pending", None),
            vec![container("init", waiting("PodInitializing"), false)],
            vec![],
        );
        assert_eq!(display_status(&pod), "Init:0/0");
    }

    #[test]
    fn completed_with_running_container_is_running() {
        let pod = with_containers(
            test_pod("p", "ns", &[], "Running", None),
            vec![],
            vec![
                container("sidecar", running(), true),
                container("main", terminated(Some("Completed"), 0, None), false),
            ],
        );
        assert_eq!(display_status(&pod), "Running");
    }

    #[test]
    fn deletion_shows_terminating() {
        let mut pod = test_pod("p", "ns", &[], "Running", None);
        pod.metadata.deletion_timestamp = Some(Time(Utc::now()));
        assert_eq!(display_status(&pod), "Terminating");
        assert!(is_completed(&pod));

        pod.status.get_or_insert_with(Default::default).reason = Some("NodeLost".to_string());
        assert_eq!(display_status(&pod), "Unknown");
    }
}
