use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use api_types::JobStatus;
use api_types::ResourceType;
use chrono::Duration;
use chrono::Utc;
use error_stack::Report;
use futures::future::join_all;
use futures::future::try_join_all;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::access::ResourceAccessor;
use crate::access::ResourceKind;
use crate::training::JobType;
use crate::training::Trainer;
use crate::training::TrainerRegistry;
use crate::training::TrainingError;
use crate::training::TrainingJob;

/// Caller-facing training job operations over the trainer registry.
#[derive(Clone)]
pub struct TrainingService {
    registry: Arc<TrainerRegistry>,
    accessor: Arc<ResourceAccessor>,
}

impl TrainingService {
    pub fn new(registry: Arc<TrainerRegistry>, accessor: Arc<ResourceAccessor>) -> Self {
        Self { registry, accessor }
    }

    pub fn registry(&self) -> &Arc<TrainerRegistry> {
        &self.registry
    }

    pub fn enabled_job_types(&self) -> Vec<JobType> {
        self.registry.enabled()
    }

    pub fn is_job_type_enabled(&self, job_type: JobType) -> bool {
        self.registry.is_enabled(job_type)
    }

    fn trainer(&self, job_type: JobType) -> Result<Arc<dyn Trainer>, Report<TrainingError>> {
        self.registry
            .get(job_type)
            .filter(|trainer| trainer.is_enabled())
            .ok_or_else(|| Report::new(TrainingError::Unsupported { job_type }))
    }

    fn enabled_trainers(&self) -> Vec<Arc<dyn Trainer>> {
        self.registry
            .all()
            .into_values()
            .filter(|trainer| trainer.is_enabled())
            .collect()
    }

    /// Finds a job by name, asking every enabled trainer when no type is given.
    ///
    /// # Errors
    ///
    /// - [`TrainingError::Unsupported`] if the given type is disabled
    /// - [`TrainingError::JobNotFound`] if no trainer has the job
    /// - [`TrainingError::NoPrivileges`] if the only match is hidden from the caller
    /// - [`TrainingError::AmbiguousJobName`] if more than one type has a job of that name
    /// - [`TrainingError::Backend`] if a read fails
    #[tracing::instrument(skip(self))]
    pub async fn get_training_job(
        &self,
        name: &str,
        namespace: &str,
        job_type: Option<JobType>,
    ) -> Result<TrainingJob, Report<TrainingError>> {
        if let Some(job_type) = job_type {
            return self.trainer(job_type)?.get_training_job(name, namespace).await;
        }

        let trainers = self.enabled_trainers();
        let results = join_all(
            trainers
                .iter()
                .map(|trainer| trainer.get_training_job(name, namespace)),
        )
        .await;

        let mut found = Vec::new();
        let mut denied = None;
        for result in results {
            match result {
                Ok(job) => found.push(job),
                Err(e) if e.current_context().is_not_found() => {}
                Err(e) if matches!(e.current_context(), TrainingError::NoPrivileges { .. }) => {
                    denied = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        match found.len() {
            0 => Err(denied.unwrap_or_else(|| Report::new(TrainingError::not_found(name, namespace)))),
            1 => Ok(found.remove(0)),
            _ => {
                let job_types = found
                    .iter()
                    .map(|job| job.job_type().to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                Err(Report::new(TrainingError::AmbiguousJobName {
                    name: name.to_string(),
                    job_types,
                }))
            }
        }
    }

    /// Lists jobs of every enabled type, or of `job_type` only; newest first.
    ///
    /// # Errors
    ///
    /// - the first trainer error
    #[tracing::instrument(skip(self))]
    pub async fn list_training_jobs(
        &self,
        namespace: &str,
        all_namespaces: bool,
        job_type: Option<JobType>,
    ) -> Result<Vec<TrainingJob>, Report<TrainingError>> {
        let trainers: Vec<Arc<dyn Trainer>> = match job_type {
            Some(job_type) => self.registry.get(job_type).into_iter().collect(),
            None => self.enabled_trainers(),
        };

        let mut jobs: Vec<TrainingJob> = try_join_all(
            trainers
                .iter()
                .map(|trainer| trainer.list_training_jobs(namespace, all_namespaces)),
        )
        .await?
        .into_iter()
        .flatten()
        .collect();
        jobs.sort_by(newest_first);
        debug!(count = jobs.len(), "listed training jobs");
        Ok(jobs)
    }

    /// Lists jobs by requested GPUs, largest first.
    ///
    /// # Errors
    ///
    /// - the first trainer error
    pub async fn top_jobs(
        &self,
        namespace: &str,
        all_namespaces: bool,
    ) -> Result<Vec<TrainingJob>, Report<TrainingError>> {
        let mut jobs = self
            .list_training_jobs(namespace, all_namespaces, None)
            .await?;
        jobs.sort_by_key(|job| std::cmp::Reverse(job.requested_gpus()));
        Ok(jobs)
    }

    /// Deletes the job's custom resource, then its associated resources.
    ///
    /// # Errors
    ///
    /// - any error of [`Self::get_training_job`]
    /// - [`TrainingError::Backend`] if the custom resource cannot be deleted
    /// - [`TrainingError::DeleteFailed`] if some associated resources remain
    #[tracing::instrument(skip(self))]
    pub async fn delete_training_job(
        &self,
        name: &str,
        namespace: &str,
        job_type: Option<JobType>,
    ) -> Result<(), Report<TrainingError>> {
        let job = self.get_training_job(name, namespace, job_type).await?;
        self.delete_job(&job).await
    }

    async fn delete_job(&self, job: &TrainingJob) -> Result<(), Report<TrainingError>> {
        self.accessor
            .delete(job.job_type().kind(), Some(job.namespace()), job.name())
            .await
            .map_err(|report| {
                if report.current_context().is_not_found() {
                    report.change_context(TrainingError::not_found(job.name(), job.namespace()))
                } else {
                    report.change_context(TrainingError::backend(format!(
                        "deleting {} {}/{}",
                        job.job_type(),
                        job.namespace(),
                        job.name()
                    )))
                }
            })?;
        info!(job_type = %job.job_type(), namespace = %job.namespace(), name = %job.name(), "deleted training job");
        self.delete_associated_resources(job).await
    }

    /// Best-effort delete of every resource associated with `job`.
    ///
    /// Each failure is logged; all resources are attempted before returning.
    ///
    /// # Errors
    ///
    /// - [`TrainingError::DeleteFailed`] with the failed resources attached
    pub async fn delete_associated_resources(&self, job: &TrainingJob) -> Result<(), Report<TrainingError>> {
        let namespace = job.namespace();
        let mut failures = Vec::new();
        for resource in job.resources() {
            let kind = match resource.resource_type {
                ResourceType::Pod => ResourceKind::Pod,
                ResourceType::StatefulSet => ResourceKind::StatefulSet,
                ResourceType::Job => ResourceKind::BatchJob,
            };
            match self.accessor.delete(kind, Some(namespace), &resource.name).await {
                Ok(()) => debug!(kind = %kind, name = %resource.name, "deleted associated resource"),
                Err(e) if e.current_context().is_not_found() => {
                    debug!(kind = %kind, name = %resource.name, "associated resource already gone");
                }
                Err(e) => {
                    warn!(kind = %kind, name = %resource.name, "failed to delete associated resource: {e:?}");
                    failures.push(format!("{kind} {namespace}/{}", resource.name));
                }
            }
        }

        if failures.is_empty() {
            return Ok(());
        }
        let mut report = Report::new(TrainingError::DeleteFailed {
            failures: failures.len(),
        });
        for failure in failures {
            report = report.attach_printable(failure);
        }
        Err(report)
    }

    /// Deletes jobs that are not running and were created more than `since` ago.
    ///
    /// Returns the names of the pruned jobs; individual failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// - [`TrainingError::InvalidArgument`] if `since` is negative
    /// - the first listing error
    #[tracing::instrument(skip(self))]
    pub async fn prune_training_jobs(
        &self,
        namespace: &str,
        all_namespaces: bool,
        since: Duration,
    ) -> Result<Vec<String>, Report<TrainingError>> {
        if since < Duration::zero() {
            return Err(Report::new(TrainingError::InvalidArgument {
                message: format!("prune window must not be negative, got {since}"),
            }));
        }

        let now = Utc::now();
        let jobs = self
            .list_training_jobs(namespace, all_namespaces, None)
            .await?;
        let mut pruned = Vec::new();
        for job in jobs
            .iter()
            .filter(|job| job.status() != JobStatus::Running && job.age(now) > since)
        {
            match self.delete_job(job).await {
                Ok(()) => pruned.push(job.name().to_string()),
                Err(e) => warn!(name = %job.name(), "failed to prune training job: {e:?}"),
            }
        }
        info!(count = pruned.len(), "pruned training jobs");
        Ok(pruned)
    }

    /// Merges `labels` into the job's custom resource labels.
    ///
    /// # Errors
    ///
    /// - [`TrainingError::JobNotFound`] if the custom resource is gone
    /// - [`TrainingError::Backend`] if the patch is rejected
    pub async fn patch_job_labels(
        &self,
        job: &TrainingJob,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), Report<TrainingError>> {
        self.accessor
            .patch_labels(job.job_type().kind(), Some(job.namespace()), job.name(), labels)
            .await
            .map_err(|report| {
                if report.current_context().is_not_found() {
                    report.change_context(TrainingError::not_found(job.name(), job.namespace()))
                } else {
                    report.change_context(TrainingError::backend(format!(
                        "patching labels of {}/{}",
                        job.namespace(),
                        job.name()
                    )))
                }
            })?;
        Ok(())
    }
}

/// Newest start time first; jobs that have not started come before all others.
fn newest_first(a: &TrainingJob, b: &TrainingJob) -> Ordering {
    match (a.start_time(), b.start_time()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => b.cmp(&a),
    }
}
