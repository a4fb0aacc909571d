//! In-memory cluster and object builders for tests.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use error_stack::Report;
use futures::stream;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use kube::runtime::watcher::Event;

use crate::access::to_dynamic;
use crate::access::AccessibleResource;
use crate::access::ListQuery;
use crate::access::ResourceKind;
use crate::infrastructure::ClusterClient;
use crate::infrastructure::ClusterError;
use crate::infrastructure::WatchStream;
use crate::training::crds::DeepSpeedJob;
use crate::training::crds::DeepSpeedJobSpec;
use crate::training::crds::EtJob;
use crate::training::crds::EtJobSpec;
use crate::training::crds::MpiJob;
use crate::training::crds::MpiJobSpec;
use crate::training::crds::PyTorchJob;
use crate::training::crds::PyTorchJobSpec;
use crate::training::crds::TfJob;
use crate::training::crds::TfJobSpec;
use crate::training::gpu::GPU_RESOURCE;
use crate::training::JobObject;
use crate::training::JobType;

pub use crate::training::StaticIdentity;

type Key = (String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ResourceKind, BTreeMap<Key, DynamicObject>>,
    crds: HashSet<String>,
    failing_watches: HashSet<ResourceKind>,
    ending_watches: HashSet<ResourceKind>,
    scripted_events: BTreeMap<ResourceKind, Vec<Event<DynamicObject>>>,
    deleted: Vec<(ResourceKind, String, String)>,
    error_mode: bool,
}

/// A [`ClusterClient`] backed by in-memory maps, counting every call.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    crd_probe_calls: AtomicUsize,
    watch_calls: AtomicUsize,
    other_calls: AtomicUsize,
}

fn key_of(object: &DynamicObject) -> Key {
    (
        object.metadata.namespace.clone().unwrap_or_default(),
        object.metadata.name.clone().unwrap_or_default(),
    )
}

fn dynamic<K: AccessibleResource>(resource: &K) -> DynamicObject {
    to_dynamic(resource).unwrap_or_else(|e| panic!("test object does not convert: {e}"))
}

fn injected() -> Report<ClusterError> {
    Report::new(ClusterError::RequestFailed {
        message: "injected failure".to_string(),
    })
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_object(&self, kind: ResourceKind, object: DynamicObject) {
        self.state()
            .objects
            .entry(kind)
            .or_default()
            .insert(key_of(&object), object);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.add_object(ResourceKind::Pod, dynamic(&pod));
    }

    pub fn add_job(&self, job: &JobObject) {
        self.add_object(job.job_type().kind(), job_to_dynamic(job));
    }

    pub fn add_statefulset(&self, name: &str, namespace: &str, labels: &[(&str, &str)]) {
        let statefulset = StatefulSet {
            metadata: meta(name, namespace, labels),
            ..Default::default()
        };
        self.add_object(ResourceKind::StatefulSet, dynamic(&statefulset));
    }

    pub fn add_batch_job(&self, name: &str, namespace: &str, labels: &[(&str, &str)]) {
        let job = Job {
            metadata: meta(name, namespace, labels),
            ..Default::default()
        };
        self.add_object(ResourceKind::BatchJob, dynamic(&job));
    }

    pub fn install_crd(&self, crd_name: &str) {
        self.state().crds.insert(crd_name.to_string());
    }

    /// Every later call fails with [`ClusterError::RequestFailed`].
    pub fn set_error_mode(&self, enabled: bool) {
        self.state().error_mode = enabled;
    }

    /// Subscribing to `kind` fails.
    pub fn fail_watch(&self, kind: ResourceKind) {
        self.state().failing_watches.insert(kind);
    }

    /// Watch streams on `kind` end after their events instead of staying open.
    pub fn end_watch(&self, kind: ResourceKind) {
        self.state().ending_watches.insert(kind);
    }

    /// Events delivered after the initial list of the next watch on `kind`.
    pub fn script_watch(&self, kind: ResourceKind, events: Vec<Event<DynamicObject>>) {
        self.state().scripted_events.insert(kind, events);
    }

    pub fn contains(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        self.state()
            .objects
            .get(&kind)
            .is_some_and(|objects| objects.contains_key(&(namespace.to_string(), name.to_string())))
    }

    /// Deleted objects in call order.
    pub fn deleted(&self) -> Vec<(ResourceKind, String, String)> {
        self.state().deleted.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn crd_probe_calls(&self) -> usize {
        self.crd_probe_calls.load(Ordering::SeqCst)
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.list_calls()
            + self.get_calls()
            + self.delete_calls()
            + self.crd_probe_calls()
            + self.watch_calls()
            + self.other_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), Report<ClusterError>> {
        if self.state().error_mode {
            return Err(injected());
        }
        Ok(())
    }
}

fn not_found(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Report<ClusterError> {
    Report::new(ClusterError::NotFound {
        kind,
        namespace: namespace.unwrap_or_default().to_string(),
        name: name.to_string(),
    })
}

fn scoped_key(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Key {
    let namespace = if kind.is_namespaced() {
        namespace.unwrap_or_default()
    } else {
        ""
    };
    (namespace.to_string(), name.to_string())
}

#[async_trait::async_trait]
impl ClusterClient for FakeCluster {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<DynamicObject>, Report<ClusterError>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let query = ListQuery::parse(label_selector, field_selector).map_err(|e| {
            Report::new(ClusterError::RequestFailed {
                message: format!("{e:?}"),
            })
        })?;
        let namespace = namespace.filter(|ns| !ns.is_empty() && kind.is_namespaced());
        Ok(self
            .state()
            .objects
            .get(&kind)
            .into_iter()
            .flat_map(|objects| objects.values())
            .filter(|object| namespace.map_or(true, |ns| object.metadata.namespace.as_deref() == Some(ns)))
            .filter(|object| query.matches(object))
            .cloned()
            .collect())
    }

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject, Report<ClusterError>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.state()
            .objects
            .get(&kind)
            .and_then(|objects| objects.get(&scoped_key(kind, namespace, name)))
            .cloned()
            .ok_or_else(|| not_found(kind, namespace, name))
    }

    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, Report<ClusterError>> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut state = self.state();
        if state.failing_watches.contains(&kind) {
            return Err(Report::new(ClusterError::WatchFailed {
                kind,
                message: "injected failure".to_string(),
            }));
        }
        let initial: Vec<DynamicObject> = state
            .objects
            .get(&kind)
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default();
        let scripted = state.scripted_events.remove(&kind).unwrap_or_default();
        let events = std::iter::once(Event::Restarted(initial))
            .chain(scripted)
            .map(Ok::<_, Report<ClusterError>>)
            .collect::<Vec<_>>();
        if state.ending_watches.contains(&kind) {
            return Ok(stream::iter(events).boxed());
        }
        Ok(stream::iter(events).chain(stream::pending()).boxed())
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), Report<ClusterError>> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let key = scoped_key(kind, namespace, name);
        let mut state = self.state();
        state
            .objects
            .get_mut(&kind)
            .and_then(|objects| objects.remove(&key))
            .ok_or_else(|| not_found(kind, namespace, name))?;
        state.deleted.push((kind, key.0, key.1));
        Ok(())
    }

    async fn patch_labels(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<DynamicObject, Report<ClusterError>> {
        self.other_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let mut state = self.state();
        let object = state
            .objects
            .get_mut(&kind)
            .and_then(|objects| objects.get_mut(&scoped_key(kind, namespace, name)))
            .ok_or_else(|| not_found(kind, namespace, name))?;
        object
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
        Ok(object.clone())
    }

    async fn crd_exists(&self, crd_name: &str) -> Result<bool, Report<ClusterError>> {
        self.crd_probe_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.state().crds.contains(crd_name))
    }
}

fn meta(name: &str, namespace: &str, labels: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(format!("uid-{namespace}-{name}")),
        labels: Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

/// A pod in `phase`; scheduled pods also get a host IP.
pub fn test_pod(
    name: &str,
    namespace: &str,
    labels: &[(&str, &str)],
    phase: &str,
    node: Option<&str>,
) -> Pod {
    Pod {
        metadata: meta(name, namespace, labels),
        spec: Some(PodSpec {
            node_name: node.map(str::to_string),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            host_ip: node.map(|_| "10.0.0.1".to_string()),
            ..Default::default()
        }),
    }
}

/// Replaces the pod's containers with one per entry, each limited to that many GPUs.
pub fn with_gpus(mut pod: Pod, gpus: &[u64]) -> Pod {
    let containers = gpus
        .iter()
        .enumerate()
        .map(|(i, count)| Container {
            name: format!("c{i}"),
            resources: Some(ResourceRequirements {
                limits: Some(BTreeMap::from([(
                    GPU_RESOURCE.to_string(),
                    Quantity(count.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    pod.spec.get_or_insert_with(Default::default).containers = containers;
    pod
}

fn epoch_2024() -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200, 0).single().unwrap_or_default()
}

pub fn with_start_time(mut pod: Pod) -> Pod {
    pod.status.get_or_insert_with(Default::default).start_time = Some(Time(epoch_2024()));
    pod
}

/// A job owned by `name` in `namespace` with no status, created 2024-01-01.
pub fn test_job(job_type: JobType, name: &str, namespace: &str) -> JobObject {
    let mut metadata = meta(name, namespace, &[("release", name), ("app", job_type.tag())]);
    metadata.creation_timestamp = Some(Time(epoch_2024()));
    match job_type {
        JobType::TfJob => {
            let mut job = TfJob::new(name, TfJobSpec::default());
            job.metadata = metadata;
            JobObject::Tf(job)
        }
        JobType::PyTorchJob => {
            let mut job = PyTorchJob::new(name, PyTorchJobSpec::default());
            job.metadata = metadata;
            JobObject::PyTorch(job)
        }
        JobType::MpiJob => {
            let mut job = MpiJob::new(name, MpiJobSpec::default());
            job.metadata = metadata;
            JobObject::Mpi(job)
        }
        JobType::EtJob => {
            let mut job = EtJob::new(name, EtJobSpec::default());
            job.metadata = metadata;
            JobObject::Et(job)
        }
        JobType::DeepSpeedJob => {
            let mut job = DeepSpeedJob::new(name, DeepSpeedJobSpec::default());
            job.metadata = metadata;
            JobObject::DeepSpeed(job)
        }
    }
}

pub fn job_to_dynamic(job: &JobObject) -> DynamicObject {
    match job {
        JobObject::Tf(job) => dynamic(job),
        JobObject::PyTorch(job) => dynamic(job),
        JobObject::Mpi(job) => dynamic(job),
        JobObject::Et(job) => dynamic(job),
        JobObject::DeepSpeed(job) => dynamic(job),
    }
}

pub fn test_job_object(job_type: JobType, name: &str, namespace: &str) -> DynamicObject {
    job_to_dynamic(&test_job(job_type, name, namespace))
}
