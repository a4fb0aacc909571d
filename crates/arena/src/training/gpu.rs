//! GPU accounting over member pods.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;

use crate::training::pods;

pub const GPU_RESOURCE: &str = "nvidia.com/gpu";
pub const LEGACY_GPU_RESOURCE: &str = "alpha.kubernetes.io/nvidia-gpu";
/// Set by the admission component on pods of a job with the job-wide GPU request.
pub const GPU_REQUEST_ANNOTATION: &str = "requestGPUsOfJobOwner";

/// Parses a resource quantity such as `2`, `500m`, `1k` or `1Ki`.
///
/// Supports the decimal suffixes `m`, `k`, `M`, `G`, `T`, `P`, `E` and the
/// binary suffixes `Ki` through `Ei`. Returns `None` for anything else,
/// including `inf` and `NaN`.
pub fn parse_quantity(value: &str) -> Option<f64> {
    let value = value.trim();
    if let Ok(plain) = value.parse::<f64>() {
        return plain.is_finite().then_some(plain);
    }

    let pos = value.find(|c: char| c.is_alphabetic())?;
    let (numeric_part, unit) = value.split_at(pos);
    let numeric_value: f64 = numeric_part.parse().ok()?;

    let multiplier = match unit {
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024_f64.powi(2),
        "Gi" => 1024_f64.powi(3),
        "Ti" => 1024_f64.powi(4),
        "Pi" => 1024_f64.powi(5),
        "Ei" => 1024_f64.powi(6),
        _ => return None,
    };
    let parsed = numeric_value * multiplier;
    parsed.is_finite().then_some(parsed)
}

/// GPU limit of a container's limits; fractional quantities round up.
fn gpu_limit(limits: &BTreeMap<String, Quantity>) -> u64 {
    let quantity = limits
        .get(GPU_RESOURCE)
        .or_else(|| limits.get(LEGACY_GPU_RESOURCE));
    let Some(quantity) = quantity else {
        return 0;
    };
    match parse_quantity(&quantity.0) {
        Some(value) if value > 0.0 => value.ceil() as u64,
        Some(_) => 0,
        None => {
            debug!(quantity = %quantity.0, "ignoring unparsable GPU quantity");
            0
        }
    }
}

/// Sum of the GPU limits of the pod's containers.
pub fn gpus_in_pod(pod: &Pod) -> u64 {
    pod.spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .filter_map(|c| c.resources.as_ref().and_then(|r| r.limits.as_ref()))
                .map(gpu_limit)
                .fold(0, u64::saturating_add)
        })
        .unwrap_or(0)
}

/// GPUs held by a pod that has started and is not completed.
pub fn gpus_in_active_pod(pod: &Pod) -> u64 {
    let started = pod.status.as_ref().is_some_and(|s| s.start_time.is_some());
    if !started || pods::is_completed(pod) || pods::is_pending(pod) {
        return 0;
    }
    gpus_in_pod(pod)
}

/// The job-wide request annotation of the first pod that carries a positive value.
pub fn requested_gpus_from_annotation(pods: &[Pod]) -> Option<u64> {
    pods.iter().find_map(|pod| {
        let value = pod.metadata.annotations.as_ref()?.get(GPU_REQUEST_ANNOTATION)?;
        value.trim().parse::<u64>().ok().filter(|gpus| *gpus > 0)
    })
}

pub fn requested_gpus(pods: &[Pod]) -> u64 {
    requested_gpus_from_annotation(pods)
        .unwrap_or_else(|| pods.iter().map(gpus_in_pod).fold(0, u64::saturating_add))
}

pub fn allocated_gpus(pods: &[Pod]) -> u64 {
    pods.iter().map(gpus_in_active_pod).fold(0, u64::saturating_add)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::mock::test_pod;
    use crate::mock::with_gpus;
    use crate::mock::with_start_time;

    #[test]
    fn parse_quantity_plain_and_suffixed() {
        assert_eq!(parse_quantity("2"), Some(2.0));
        assert_eq!(parse_quantity("500m"), Some(0.5));
        assert_eq!(parse_quantity("1k"), Some(1000.0));
        assert_eq!(parse_quantity("1Ki"), Some(1024.0));
        assert_eq!(parse_quantity("abc"), None);
        assert_eq!(parse_quantity("1Xi"), None);
        assert_eq!(parse_quantity("2P"), Some(2e15));
        assert_eq!(parse_quantity("1Ei"), Some(1024_f64.powi(6)));
    }

    #[test]
    fn parse_quantity_rejects_non_finite_values() {
        for value in ["inf", "-inf", "NaN", "infinity", "1e400", "1e390E"] {
            assert_eq!(parse_quantity(value), None, "{value}");
        }
    }

    #[test]
    fn gpu_totals_saturate_instead_of_overflowing() {
        let huge = 10_000_000_000_000_000_000;
        let pod = with_gpus(test_pod("a", "ns", &[], "Running", None), &[huge, huge]);
        assert_eq!(gpus_in_pod(&pod), u64::MAX);
        assert_eq!(requested_gpus(&[pod.clone(), pod]), u64::MAX);
    }

    #[test]
    fn requested_sums_container_limits() {
        let pods = vec![
            with_gpus(test_pod("a", "ns", &[], "Running", None), &[2, 1]),
            with_gpus(test_pod("b", "ns", &[], "Pending", None), &[4]),
        ];
        assert_eq!(requested_gpus(&pods), 7);
    }

    #[test]
    fn annotation_overrides_container_sum() {
        let mut annotated = with_gpus(test_pod("a", "ns", &[], "Running", None), &[1]);
        annotated.metadata.annotations = Some(
            [(GPU_REQUEST_ANNOTATION.to_string(), "8".to_string())]
                .into_iter()
                .collect(),
        );
        let mut zero = with_gpus(test_pod("z", "ns", &[], "Running", None), &[1]);
        zero.metadata.annotations = Some(
            [(GPU_REQUEST_ANNOTATION.to_string(), "0".to_string())]
                .into_iter()
                .collect(),
        );

        assert_eq!(requested_gpus(&[zero.clone(), annotated]), 8);
        assert_eq!(requested_gpus(&[zero]), 1);
    }

    #[test]
    fn allocated_counts_only_started_active_pods() {
        let pods = vec![
            with_start_time(with_gpus(test_pod("run", "ns", &[], "Running", Some("n")), &[2])),
            with_gpus(test_pod("unstarted", "ns", &[], "Running", Some("n")), &[2]),
            with_start_time(with_gpus(test_pod("pending", "ns", &[], "Pending", None), &[2])),
            with_start_time(with_gpus(test_pod("done", "ns", &[], "Succeeded", Some("n")), &[2])),
        ];
        assert_eq!(allocated_gpus(&pods), 2);
    }
}
