//! Pod and job cache for a single job type, fed by an external watch.
//!
//! Every read and write takes the same lock; reads hand out clones.

use std::collections::HashMap;
use std::sync::PoisonError;
use std::sync::RwLock;

use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::Event;
use kube::ResourceExt;
use tracing::debug;

use crate::training::crds::DeepSpeedJob;
use crate::training::crds::EtJob;
use crate::training::crds::MpiJob;
use crate::training::crds::PyTorchJob;
use crate::training::crds::TfJob;
use crate::training::JobType;

/// A job resource that can be cached together with its pods.
pub trait CachedJob: Clone + Send + Sync + 'static {
    fn namespace(&self) -> String;

    fn name(&self) -> String;

    fn is_member_pod(&self, pod: &Pod) -> bool;

    fn key(&self) -> String {
        cache_key(&self.namespace(), &self.name())
    }
}

macro_rules! cached_job {
    ($($ty:ty => $job_type:ident),* $(,)?) => {
        $(impl CachedJob for $ty {
            fn namespace(&self) -> String {
                ResourceExt::namespace(self).unwrap_or_default()
            }

            fn name(&self) -> String {
                self.name_any()
            }

            fn is_member_pod(&self, pod: &Pod) -> bool {
                JobType::$job_type.is_member_pod(&CachedJob::name(self), &CachedJob::namespace(self), pod)
            }
        })*
    };
}

cached_job! {
    TfJob => TfJob,
    PyTorchJob => PyTorchJob,
    MpiJob => MpiJob,
    EtJob => EtJob,
    DeepSpeedJob => DeepSpeedJob,
}

/// `namespace/name`
pub fn cache_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn pod_key(pod: &Pod) -> String {
    cache_key(
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default(),
    )
}

struct Inner<J> {
    pods: HashMap<String, Pod>,
    jobs: HashMap<String, J>,
}

pub struct ArenaCache<J> {
    inner: RwLock<Inner<J>>,
}

impl<J: CachedJob> Default for ArenaCache<J> {
    fn default() -> Self {
        Self::new()
    }
}

impl<J: CachedJob> ArenaCache<J> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                pods: HashMap::new(),
                jobs: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner<J>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner<J>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_or_update_pod(&self, pod: Pod) {
        self.write().pods.insert(pod_key(&pod), pod);
    }

    pub fn delete_pod(&self, namespace: &str, name: &str) {
        self.write().pods.remove(&cache_key(namespace, name));
    }

    pub fn get_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.read().pods.get(&cache_key(namespace, name)).cloned()
    }

    pub fn filter_pods(&self, predicate: impl Fn(&Pod) -> bool) -> Vec<Pod> {
        self.read()
            .pods
            .values()
            .filter(|pod| predicate(pod))
            .cloned()
            .collect()
    }

    pub fn add_or_update_job(&self, job: J) {
        self.write().jobs.insert(job.key(), job);
    }

    /// Removes the job and its member pods.
    pub fn delete_job(&self, namespace: &str, name: &str) {
        let mut inner = self.write();
        if let Some(job) = inner.jobs.remove(&cache_key(namespace, name)) {
            inner.pods.retain(|_, pod| !job.is_member_pod(pod));
        }
    }

    pub fn get_job(&self, namespace: &str, name: &str) -> Option<J> {
        self.read().jobs.get(&cache_key(namespace, name)).cloned()
    }

    /// Matching jobs with their member pods, taken from one consistent snapshot.
    pub fn filter_jobs(
        &self,
        predicate: impl Fn(&J) -> bool,
    ) -> (HashMap<String, J>, HashMap<String, Vec<Pod>>) {
        let inner = self.read();
        let mut jobs = HashMap::new();
        let mut pods = HashMap::new();
        for (key, job) in inner.jobs.iter().filter(|(_, job)| predicate(job)) {
            let members: Vec<Pod> = inner
                .pods
                .values()
                .filter(|pod| job.is_member_pod(pod))
                .cloned()
                .collect();
            jobs.insert(key.clone(), job.clone());
            pods.insert(key.clone(), members);
        }
        (jobs, pods)
    }

    pub fn apply_pod_event(&self, event: Event<Pod>) {
        match event {
            Event::Applied(pod) => self.add_or_update_pod(pod),
            Event::Deleted(pod) => {
                self.write().pods.remove(&pod_key(&pod));
            }
            Event::Restarted(pods) => {
                debug!(count = pods.len(), "resetting cached pods");
                self.write().pods = pods.into_iter().map(|pod| (pod_key(&pod), pod)).collect();
            }
        }
    }

    pub fn apply_job_event(&self, event: Event<J>) {
        match event {
            Event::Applied(job) => self.add_or_update_job(job),
            Event::Deleted(job) => self.delete_job(&job.namespace(), &job.name()),
            Event::Restarted(jobs) => {
                debug!(count = jobs.len(), "resetting cached jobs");
                self.write().jobs = jobs.into_iter().map(|job| (job.key(), job)).collect();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use kube::api::ObjectMeta;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::mock::test_pod;
    use crate::training::crds::MpiJobSpec;

    fn mpi_job(name: &str) -> MpiJob {
        let mut job = MpiJob::new(name, MpiJobSpec::default());
        job.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("ns".to_string()),
            ..Default::default()
        };
        job
    }

    fn mpi_pod(name: &str, job: &str) -> Pod {
        test_pod(
            name,
            "ns",
            &[("release", job), ("app", "mpijob"), ("group_name", "kubeflow.org")],
            "Running",
            None,
        )
    }

    #[test]
    fn filter_jobs_joins_member_pods() {
        let cache = ArenaCache::new();
        cache.add_or_update_job(mpi_job("a"));
        cache.add_or_update_job(mpi_job("b"));
        cache.add_or_update_pod(mpi_pod("a-launcher", "a"));
        cache.add_or_update_pod(mpi_pod("a-worker", "a"));
        cache.add_or_update_pod(mpi_pod("b-launcher", "b"));

        let (jobs, pods) = cache.filter_jobs(|job| job.name_any() == "a");
        assert_eq!(jobs.len(), 1);
        let mut names: Vec<_> = pods["ns/a"]
            .iter()
            .filter_map(|p| p.metadata.name.clone())
            .collect();
        names.sort();
        assert_eq!(names, ["a-launcher", "a-worker"]);
    }

    #[test]
    fn delete_job_removes_member_pods() {
        let cache = ArenaCache::new();
        cache.add_or_update_job(mpi_job("a"));
        cache.add_or_update_pod(mpi_pod("a-launcher", "a"));
        cache.add_or_update_pod(mpi_pod("b-launcher", "b"));

        cache.delete_job("ns", "a");
        assert!(cache.get_job("ns", "a").is_none());
        assert!(cache.get_pod("ns", "a-launcher").is_none());
        assert!(cache.get_pod("ns", "b-launcher").is_some());
    }

    #[test]
    fn reads_return_copies() {
        let cache: ArenaCache<MpiJob> = ArenaCache::new();
        cache.add_or_update_pod(mpi_pod("a-launcher", "a"));
        let mut pod = cache.get_pod("ns", "a-launcher").unwrap();
        pod.metadata.labels = None;
        assert!(cache.get_pod("ns", "a-launcher").unwrap().metadata.labels.is_some());
    }

    #[test]
    fn watch_events_drive_the_cache() {
        let cache: ArenaCache<MpiJob> = ArenaCache::new();
        cache.apply_pod_event(Event::Restarted(vec![mpi_pod("x", "a"), mpi_pod("y", "a")]));
        cache.apply_pod_event(Event::Deleted(mpi_pod("x", "a")));
        cache.apply_pod_event(Event::Applied(mpi_pod("z", "b")));
        assert_eq!(cache.filter_pods(|_| true).len(), 2);

        cache.apply_job_event(Event::Applied(mpi_job("a")));
        cache.apply_job_event(Event::Deleted(mpi_job("a")));
        assert!(cache.get_job("ns", "a").is_none());
        assert_eq!(cache.filter_pods(|_| true).len(), 1);
    }
}
