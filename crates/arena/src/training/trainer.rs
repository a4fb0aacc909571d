use std::sync::Arc;

use api_types::ResourceRef;
use api_types::ResourceType;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::access::ResourceAccessor;
use crate::training::chief::select_members;
use crate::training::IdentityProvider;
use crate::training::JobObject;
use crate::training::JobType;
use crate::training::TrainingError;
use crate::training::TrainingJob;

/// Job retrieval for one job type.
#[async_trait::async_trait]
pub trait Trainer: Send + Sync {
    fn job_type(&self) -> JobType;

    /// Whether the job type's custom-resource-definition was present at probe time.
    fn is_enabled(&self) -> bool;

    /// Whether a job of this type called `name` exists in `namespace`. Never fails.
    async fn is_supported(&self, name: &str, namespace: &str) -> bool;

    /// # Errors
    ///
    /// - [`TrainingError::Unsupported`] if the trainer is disabled
    /// - [`TrainingError::JobNotFound`] if no owned job of this type exists
    /// - [`TrainingError::NoPrivileges`] if namespace isolation hides the job
    /// - [`TrainingError::Backend`] for any other read failure
    async fn get_training_job(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<TrainingJob, Report<TrainingError>>;

    /// Lists jobs in `namespace`, or everywhere with `all_namespaces`.
    ///
    /// # Errors
    ///
    /// - [`TrainingError::Backend`] on the first failed read
    async fn list_training_jobs(
        &self,
        namespace: &str,
        all_namespaces: bool,
    ) -> Result<Vec<TrainingJob>, Report<TrainingError>>;
}

/// The trainer shared by every job type; per-type rules live on [`JobType`].
pub struct JobTrainer {
    job_type: JobType,
    enabled: bool,
    accessor: Arc<ResourceAccessor>,
    identity: Arc<dyn IdentityProvider>,
}

impl JobTrainer {
    /// Probes the cluster for the job type's custom-resource-definition.
    ///
    /// A failed probe disables the trainer; it is never an error.
    #[tracing::instrument(skip(accessor, identity))]
    pub async fn probe(
        job_type: JobType,
        accessor: Arc<ResourceAccessor>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let crd_name = job_type.crd_name();
        let enabled = match accessor.crd_exists(&crd_name).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(crd = %crd_name, "custom resource definition not installed");
                false
            }
            Err(e) => {
                warn!(crd = %crd_name, "probe failed, disabling trainer: {e:?}");
                false
            }
        };
        info!(job_type = %job_type, enabled, "trainer initialized");
        Self::new(job_type, enabled, accessor, identity)
    }

    pub fn new(
        job_type: JobType,
        enabled: bool,
        accessor: Arc<ResourceAccessor>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            job_type,
            enabled,
            accessor,
            identity,
        }
    }

    /// Same trainer, same probe result, reading through another accessor.
    pub fn rebind(&self, accessor: Arc<ResourceAccessor>) -> Self {
        Self::new(self.job_type, self.enabled, accessor, self.identity.clone())
    }

    fn unsupported(&self) -> Report<TrainingError> {
        Report::new(TrainingError::Unsupported {
            job_type: self.job_type,
        })
    }

    fn backend(&self, namespace: Option<&str>) -> TrainingError {
        TrainingError::backend(format!(
            "reading {} resources in {}",
            self.job_type,
            namespace.unwrap_or("all namespaces")
        ))
    }

    async fn candidate_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>, Report<TrainingError>> {
        self.accessor
            .list::<Pod>(namespace, &self.job_type.pod_selector(), "")
            .await
            .change_context_lazy(|| self.backend(namespace))
    }

    /// Stateful sets and batch jobs that carry the type's association label.
    async fn candidate_resources(
        &self,
        namespace: Option<&str>,
    ) -> Result<(Vec<StatefulSet>, Vec<Job>), Report<TrainingError>> {
        let Some(label) = self.job_type.associated_label() else {
            return Ok((Vec::new(), Vec::new()));
        };
        let statefulsets = self
            .accessor
            .list::<StatefulSet>(namespace, label, "")
            .await
            .change_context_lazy(|| self.backend(namespace))?;
        let jobs = self
            .accessor
            .list::<Job>(namespace, label, "")
            .await
            .change_context_lazy(|| self.backend(namespace))?;
        Ok((statefulsets, jobs))
    }

    fn assemble(
        &self,
        object: JobObject,
        pods: &[Pod],
        statefulsets: &[StatefulSet],
        jobs: &[Job],
    ) -> TrainingJob {
        let name = object.name().to_string();
        let namespace = object.namespace().to_string();
        let in_namespace = |meta: &ObjectMeta| {
            meta.namespace.as_deref() == Some(namespace.as_str())
        };

        let mut associated = Vec::new();
        for sts in statefulsets.iter().filter(|s| in_namespace(&s.metadata)) {
            if self.job_type.is_associated(&name, sts.metadata.labels.as_ref(), false) {
                associated.push(resource_ref(&sts.metadata, ResourceType::StatefulSet));
            }
        }
        for job in jobs.iter().filter(|j| in_namespace(&j.metadata)) {
            if self.job_type.is_associated(&name, job.metadata.labels.as_ref(), true) {
                associated.push(resource_ref(&job.metadata, ResourceType::Job));
            }
        }

        let members = select_members(&object, pods.iter().cloned());
        TrainingJob::new(object, members, associated)
    }
}

fn resource_ref(meta: &ObjectMeta, resource_type: ResourceType) -> ResourceRef {
    ResourceRef {
        name: meta.name.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        resource_type,
    }
}

#[async_trait::async_trait]
impl Trainer for JobTrainer {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn is_supported(&self, name: &str, namespace: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match JobObject::fetch(&self.accessor, self.job_type, namespace, name).await {
            Ok(object) => self.job_type.is_owned_job(name, namespace, &object),
            Err(e) => {
                if !e.current_context().is_not_found() {
                    debug!(job_type = %self.job_type, name, namespace, "lookup failed: {e:?}");
                }
                false
            }
        }
    }

    #[tracing::instrument(skip(self), fields(job_type = %self.job_type))]
    async fn get_training_job(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<TrainingJob, Report<TrainingError>> {
        if !self.enabled {
            return Err(self.unsupported());
        }

        let object = JobObject::fetch(&self.accessor, self.job_type, namespace, name)
            .await
            .map_err(|report| {
                if report.current_context().is_not_found() {
                    report.change_context(TrainingError::not_found(name, namespace))
                } else {
                    report.change_context(self.backend(Some(namespace)))
                }
            })?;

        if !self.job_type.is_owned_job(name, namespace, &object) {
            debug!("custom resource exists but is not owned by this job type");
            return Err(Report::new(TrainingError::not_found(name, namespace)));
        }
        if !self.identity.may_access(&object) {
            return Err(Report::new(TrainingError::NoPrivileges {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }));
        }

        let scope = Some(namespace);
        let pods = self.candidate_pods(scope).await?;
        let (statefulsets, jobs) = self.candidate_resources(scope).await?;
        Ok(self.assemble(object, &pods, &statefulsets, &jobs))
    }

    #[tracing::instrument(skip(self), fields(job_type = %self.job_type))]
    async fn list_training_jobs(
        &self,
        namespace: &str,
        all_namespaces: bool,
    ) -> Result<Vec<TrainingJob>, Report<TrainingError>> {
        if !self.enabled {
            return Ok(Vec::new());
        }

        let scope = (!all_namespaces).then_some(namespace);
        let objects: Vec<JobObject> = JobObject::list(&self.accessor, self.job_type, scope)
            .await
            .change_context_lazy(|| self.backend(scope))?
            .into_iter()
            .filter(|object| {
                self.job_type
                    .is_owned_job(object.name(), object.namespace(), object)
            })
            .filter(|object| self.identity.may_access(object))
            .collect();
        if objects.is_empty() {
            return Ok(Vec::new());
        }

        let pods = self.candidate_pods(scope).await?;
        let (statefulsets, jobs) = self.candidate_resources(scope).await?;
        debug!(count = objects.len(), pods = pods.len(), "assembling training jobs");
        Ok(objects
            .into_iter()
            .map(|object| self.assemble(object, &pods, &statefulsets, &jobs))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::mock::test_job_object;
    use crate::mock::test_pod;
    use crate::mock::FakeCluster;
    use crate::training::StaticIdentity;

    fn trainer(cluster: &Arc<FakeCluster>, job_type: JobType, enabled: bool) -> JobTrainer {
        let accessor = Arc::new(ResourceAccessor::direct(cluster.clone()));
        JobTrainer::new(job_type, enabled, accessor, Arc::new(StaticIdentity::default()))
    }

    #[test(tokio::test)]
    async fn probe_follows_crd_presence() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.install_crd(&JobType::PyTorchJob.crd_name());
        let accessor = Arc::new(ResourceAccessor::direct(cluster.clone()));
        let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentity::default());

        let pytorch = JobTrainer::probe(JobType::PyTorchJob, accessor.clone(), identity.clone()).await;
        let mpi = JobTrainer::probe(JobType::MpiJob, accessor, identity).await;
        assert!(pytorch.is_enabled());
        assert!(!mpi.is_enabled());
    }

    #[test(tokio::test)]
    async fn failed_probe_disables_trainer() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.set_error_mode(true);
        let accessor = Arc::new(ResourceAccessor::direct(cluster.clone()));
        let trainer = JobTrainer::probe(JobType::TfJob, accessor, Arc::new(StaticIdentity::default())).await;
        assert!(!trainer.is_enabled());
    }

    #[test(tokio::test)]
    async fn associated_resources_are_collected() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_object(JobType::MpiJob.kind(), test_job_object(JobType::MpiJob, "m", "ns"));
        cluster.add_pod(test_pod(
            "m-launcher",
            "ns",
            &[("release", "m"), ("app", "mpijob"), ("group_name", "kubeflow.org"), ("mpi_role_type", "launcher")],
            "Running",
            Some("node-1"),
        ));
        cluster.add_statefulset("m-worker", "ns", &[("mpi_job_name", "m")]);
        cluster.add_batch_job("m-launcher", "ns", &[("mpi_job_name", "m-mpijob")]);
        cluster.add_batch_job("other", "ns", &[("mpi_job_name", "other")]);

        let job = trainer(&cluster, JobType::MpiJob, true)
            .get_training_job("m", "ns")
            .await
            .unwrap();
        let mut kinds: Vec<_> = job
            .resources()
            .iter()
            .map(|r| (r.resource_type, r.name.as_str()))
            .collect();
        kinds.sort_by_key(|(_, name)| name.to_string());
        assert_eq!(
            kinds,
            vec![
                (ResourceType::Pod, "m-launcher"),
                (ResourceType::Job, "m-launcher"),
                (ResourceType::StatefulSet, "m-worker"),
            ]
        );
    }

    #[test(tokio::test)]
    async fn unowned_custom_resource_is_not_found() {
        let cluster = Arc::new(FakeCluster::new());
        let mut object = test_job_object(JobType::PyTorchJob, "pt", "ns");
        object.metadata.labels = None;
        cluster.add_object(JobType::PyTorchJob.kind(), object);

        let trainer = trainer(&cluster, JobType::PyTorchJob, true);
        let err = trainer.get_training_job("pt", "ns").await.unwrap_err();
        assert!(err.current_context().is_not_found());
        assert!(!trainer.is_supported("pt", "ns").await);
    }

    #[test(tokio::test)]
    async fn backend_errors_propagate_from_listing() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.set_error_mode(true);
        let err = trainer(&cluster, JobType::TfJob, true)
            .list_training_jobs("ns", false)
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), TrainingError::Backend { .. }));
    }
}
