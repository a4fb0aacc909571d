use std::collections::BTreeMap;
use std::sync::Arc;

use api_types::JobStatus;
use api_types::ResourceType;
use arena::access::CacheMirror;
use arena::access::ResourceAccessor;
use arena::access::ResourceKind;
use arena::mock::test_job;
use arena::mock::test_pod;
use arena::mock::with_gpus;
use arena::mock::with_start_time;
use arena::mock::FakeCluster;
use arena::mock::StaticIdentity;
use arena::training::crds::JobCondition;
use arena::training::crds::PhaseJobStatus;
use arena::training::crds::ReplicatedJobStatus;
use arena::training::status::JOB_SUPERVISOR_STATUS_ANNOTATION;
use arena::training::IdentityProvider;
use arena::training::JobObject;
use arena::training::JobType;
use arena::training::TrainerRegistry;
use arena::training::TrainingError;
use arena::training::TrainingService;
use arena::training::USER_ID_LABEL;
use chrono::Duration;
use k8s_openapi::api::core::v1::Pod;
use similar_asserts::assert_eq;
use test_log::test;

fn mpi_job(name: &str, condition: &str) -> JobObject {
    let JobObject::Mpi(mut job) = test_job(JobType::MpiJob, name, "ns") else {
        unreachable!()
    };
    job.status = Some(ReplicatedJobStatus {
        conditions: vec![JobCondition {
            type_: condition.to_string(),
            status: "True".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    });
    JobObject::Mpi(job)
}

fn mpi_pod(job: &str, name: &str, role: &str, phase: &str) -> Pod {
    test_pod(
        name,
        "ns",
        &[
            ("release", job),
            ("app", "mpijob"),
            ("group_name", "kubeflow.org"),
            ("mpi_role_type", role),
        ],
        phase,
        (phase != "Pending").then_some("node-1"),
    )
}

fn cluster_with(job_types: &[JobType]) -> Arc<FakeCluster> {
    let cluster = Arc::new(FakeCluster::new());
    for job_type in job_types {
        cluster.install_crd(&job_type.crd_name());
    }
    cluster
}

async fn service_with_identity(cluster: &Arc<FakeCluster>, identity: StaticIdentity) -> TrainingService {
    let accessor = Arc::new(ResourceAccessor::direct(cluster.clone()));
    let identity: Arc<dyn IdentityProvider> = Arc::new(identity);
    let registry = TrainerRegistry::probe(accessor.clone(), identity).await;
    TrainingService::new(Arc::new(registry), accessor)
}

async fn service(cluster: &Arc<FakeCluster>) -> TrainingService {
    service_with_identity(cluster, StaticIdentity::default()).await
}

fn add_running_train_1(cluster: &FakeCluster, launcher_phase: &str) {
    cluster.add_job(&mpi_job("train-1", "Running"));
    cluster.add_pod(mpi_pod("train-1", "train-1-launcher", "launcher", launcher_phase));
    cluster.add_pod(mpi_pod("train-1", "train-1-worker-0", "worker", "Running"));
    cluster.add_pod(mpi_pod("train-1", "train-1-worker-1", "worker", "Running"));
}

#[test(tokio::test)]
async fn running_job_reports_its_chief() {
    let cluster = cluster_with(&[JobType::MpiJob]);
    add_running_train_1(&cluster, "Running");

    let job = service(&cluster)
        .await
        .get_training_job("train-1", "ns", Some(JobType::MpiJob))
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::Running);
    assert_eq!(job.pods().len(), 3);
    assert_eq!(
        job.chief().and_then(|pod| pod.metadata.name.as_deref()),
        Some("train-1-launcher")
    );
}

#[test(tokio::test)]
async fn pending_chief_makes_the_job_pending() {
    let cluster = cluster_with(&[JobType::MpiJob]);
    add_running_train_1(&cluster, "Pending");

    let job = service(&cluster)
        .await
        .get_training_job("train-1", "ns", Some(JobType::MpiJob))
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::Pending);
}

#[test(tokio::test)]
async fn listing_a_type_without_jobs_is_empty() {
    let cluster = cluster_with(&[JobType::MpiJob]);
    let jobs = service(&cluster)
        .await
        .list_training_jobs("ns", false, Some(JobType::MpiJob))
        .await
        .unwrap();
    assert!(jobs.is_empty());
}

#[test(tokio::test)]
async fn wrong_type_is_not_found() {
    let cluster = cluster_with(&[JobType::MpiJob, JobType::TfJob]);
    add_running_train_1(&cluster, "Running");

    let err = service(&cluster)
        .await
        .get_training_job("train-1", "ns", Some(JobType::TfJob))
        .await
        .unwrap_err();
    assert!(matches!(err.current_context(), TrainingError::JobNotFound { .. }));
}

#[test(tokio::test)]
async fn timed_out_failure_is_max_wait_time_exceeded() {
    let cluster = cluster_with(&[JobType::EtJob]);
    let JobObject::Et(mut job) = test_job(JobType::EtJob, "et", "ns") else {
        unreachable!()
    };
    job.metadata.annotations = Some(BTreeMap::from([(
        JOB_SUPERVISOR_STATUS_ANNOTATION.to_string(),
        "timeout".to_string(),
    )]));
    job.status = Some(PhaseJobStatus {
        phase: Some("Failed".to_string()),
        ..Default::default()
    });
    cluster.add_job(&JobObject::Et(job));

    let job = service(&cluster)
        .await
        .get_training_job("et", "ns", None)
        .await
        .unwrap();
    assert_eq!(job.status(), JobStatus::MaxWaitTimeExceeded);
}

#[test(tokio::test)]
async fn disabled_types_make_no_backend_calls() {
    let cluster = cluster_with(&[]);
    let service = service(&cluster).await;
    let after_probe = cluster.total_calls();
    assert_eq!(after_probe, JobType::ALL.len());

    assert!(service.enabled_job_types().is_empty());
    let jobs = service.list_training_jobs("ns", true, None).await.unwrap();
    assert!(jobs.is_empty());
    let err = service
        .get_training_job("train-1", "ns", Some(JobType::PyTorchJob))
        .await
        .unwrap_err();
    assert!(matches!(err.current_context(), TrainingError::Unsupported { .. }));
    assert!(!service.registry().get(JobType::PyTorchJob).unwrap().is_supported("train-1", "ns").await);
    assert_eq!(cluster.total_calls(), after_probe);
}

#[test(tokio::test)]
async fn same_name_under_two_types_is_ambiguous() {
    let cluster = cluster_with(&[JobType::MpiJob, JobType::PyTorchJob]);
    cluster.add_job(&mpi_job("shared", "Running"));
    cluster.add_job(&test_job(JobType::PyTorchJob, "shared", "ns"));

    let service = service(&cluster).await;
    let err = service.get_training_job("shared", "ns", None).await.unwrap_err();
    let TrainingError::AmbiguousJobName { job_types, .. } = err.current_context() else {
        panic!("expected ambiguity, got {err:?}");
    };
    assert_eq!(job_types, "pytorchjob,mpijob");

    let job = service
        .get_training_job("shared", "ns", Some(JobType::PyTorchJob))
        .await
        .unwrap();
    assert_eq!(job.job_type(), JobType::PyTorchJob);
}

#[test(tokio::test)]
async fn isolation_hides_other_users_jobs() {
    let cluster = cluster_with(&[JobType::MpiJob]);
    let JobObject::Mpi(mut job) = mpi_job("private", "Running") else {
        unreachable!()
    };
    job.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(USER_ID_LABEL.to_string(), "alice".to_string());
    cluster.add_job(&JobObject::Mpi(job));
    cluster.add_job(&mpi_job("public", "Running"));
    let JobObject::Mpi(mut mine) = mpi_job("mine", "Running") else {
        unreachable!()
    };
    mine.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(USER_ID_LABEL.to_string(), "bob".to_string());
    cluster.add_job(&JobObject::Mpi(mine));

    let bob = StaticIdentity {
        user_id: Some("bob".to_string()),
        admin: false,
        isolate_user_in_namespace: true,
    };
    let service = service_with_identity(&cluster, bob).await;

    let err = service.get_training_job("private", "ns", None).await.unwrap_err();
    assert!(matches!(err.current_context(), TrainingError::NoPrivileges { .. }));

    let jobs = service.list_training_jobs("ns", false, None).await.unwrap();
    let names: Vec<_> = jobs.iter().map(|job| job.name().to_string()).collect();
    assert_eq!(names, ["mine"]);
}

#[test(tokio::test)]
async fn delete_removes_job_and_associated_resources() {
    let cluster = cluster_with(&[JobType::MpiJob]);
    add_running_train_1(&cluster, "Running");
    cluster.add_batch_job("train-1-launcher", "ns", &[("mpi_job_name", "train-1")]);
    cluster.add_statefulset("unrelated", "ns", &[("mpi_job_name", "other")]);

    service(&cluster)
        .await
        .delete_training_job("train-1", "ns", None)
        .await
        .unwrap();

    let deleted = cluster.deleted();
    assert_eq!(deleted[0], (ResourceKind::MpiJob, "ns".to_string(), "train-1".to_string()));
    assert_eq!(deleted.len(), 5);
    assert!(deleted.contains(&(ResourceKind::BatchJob, "ns".to_string(), "train-1-launcher".to_string())));
    assert!(cluster.contains(ResourceKind::StatefulSet, "ns", "unrelated"));
}

#[test(tokio::test)]
async fn associated_delete_attempts_every_resource() {
    let cluster = cluster_with(&[JobType::MpiJob]);
    add_running_train_1(&cluster, "Running");
    let service = service(&cluster).await;
    let job = service
        .get_training_job("train-1", "ns", None)
        .await
        .unwrap();
    assert!(job
        .resources()
        .iter()
        .all(|resource| resource.resource_type == ResourceType::Pod));

    cluster.set_error_mode(true);
    let deletes = cluster.delete_calls();
    let err = service.delete_associated_resources(&job).await.unwrap_err();
    assert!(matches!(err.current_context(), TrainingError::DeleteFailed { failures: 3 }));
    assert_eq!(cluster.delete_calls(), deletes + 3);
}

#[test(tokio::test)]
async fn prune_skips_running_jobs() {
    let cluster = cluster_with(&[JobType::MpiJob]);
    add_running_train_1(&cluster, "Running");
    cluster.add_job(&mpi_job("finished", "Succeeded"));

    let service = service(&cluster).await;
    let pruned = service
        .prune_training_jobs("ns", false, Duration::days(1))
        .await
        .unwrap();
    assert_eq!(pruned, vec!["finished".to_string()]);
    assert!(cluster.contains(ResourceKind::MpiJob, "ns", "train-1"));

    let err = service
        .prune_training_jobs("ns", false, Duration::seconds(-1))
        .await
        .unwrap_err();
    assert!(matches!(err.current_context(), TrainingError::InvalidArgument { .. }));
}

#[test(tokio::test)]
async fn top_orders_jobs_by_requested_gpus() {
    let cluster = cluster_with(&[JobType::MpiJob]);
    for (job, gpus, worker_phase) in [
        ("small", 1, "Running"),
        ("idle", 0, "Running"),
        ("large", 4, "Running"),
        ("queued", 2, "Pending"),
    ] {
        cluster.add_job(&mpi_job(job, "Running"));
        let launcher = mpi_pod(job, &format!("{job}-launcher"), "launcher", "Running");
        let worker = mpi_pod(job, &format!("{job}-worker-0"), "worker", worker_phase);
        cluster.add_pod(with_start_time(launcher));
        cluster.add_pod(with_start_time(with_gpus(worker, &[gpus])));
    }

    let jobs = service(&cluster).await.top_jobs("ns", false).await.unwrap();
    let rows: Vec<_> = jobs
        .iter()
        .map(|job| (job.name(), job.requested_gpus(), job.allocated_gpus()))
        .collect();
    assert_eq!(
        rows,
        vec![("large", 4, 4), ("queued", 2, 0), ("small", 1, 1), ("idle", 0, 0)]
    );
}

#[test(tokio::test)]
async fn patched_labels_reach_the_custom_resource() {
    let cluster = cluster_with(&[JobType::MpiJob]);
    add_running_train_1(&cluster, "Running");
    let service = service(&cluster).await;
    let job = service.get_training_job("train-1", "ns", None).await.unwrap();

    let labels = BTreeMap::from([("team".to_string(), "vision".to_string())]);
    service.patch_job_labels(&job, &labels).await.unwrap();

    let patched = service.get_training_job("train-1", "ns", None).await.unwrap();
    let patched_labels = patched.object().labels();
    assert_eq!(patched_labels.get("team").map(String::as_str), Some("vision"));
    assert_eq!(patched_labels.get("release").map(String::as_str), Some("train-1"));

    service.delete_training_job("train-1", "ns", None).await.unwrap();
    let err = service.patch_job_labels(&job, &labels).await.unwrap_err();
    assert!(matches!(err.current_context(), TrainingError::JobNotFound { .. }));
}

#[test(tokio::test)]
async fn cached_and_direct_listings_agree() {
    let cluster = cluster_with(&[JobType::MpiJob]);
    add_running_train_1(&cluster, "Running");
    cluster.add_job(&mpi_job("finished", "Succeeded"));
    cluster.add_pod(mpi_pod("finished", "finished-launcher", "launcher", "Succeeded"));

    let direct = service(&cluster).await;
    let mirror = Arc::new(CacheMirror::new(
        cluster.clone(),
        ResourceKind::BUILTIN.into_iter().chain([ResourceKind::MpiJob]),
    ));
    mirror.index_pods_by_node();
    mirror.start().await.unwrap();
    let cached_accessor = Arc::new(ResourceAccessor::cached(cluster.clone(), mirror.clone()));
    let cached = TrainingService::new(
        Arc::new(direct.registry().rebind(cached_accessor.clone())),
        cached_accessor,
    );

    let summary = |jobs: Vec<arena::training::TrainingJob>| {
        let mut rows: Vec<_> = jobs
            .iter()
            .map(|job| (job.name().to_string(), job.status().to_string(), job.pods().len()))
            .collect();
        rows.sort();
        rows
    };

    let lists = cluster.list_calls();
    let from_cache = summary(cached.list_training_jobs("ns", false, None).await.unwrap());
    assert_eq!(cluster.list_calls(), lists);
    let from_cluster = summary(direct.list_training_jobs("ns", false, None).await.unwrap());
    assert_eq!(from_cache, from_cluster);
    assert_eq!(from_cache.len(), 2);
    mirror.stop();
}
