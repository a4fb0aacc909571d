use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::info;

use crate::access::ResourceAccessor;
use crate::training::IdentityProvider;
use crate::training::JobTrainer;
use crate::training::JobType;
use crate::training::Trainer;

/// One trainer per supported job type, fully probed before first use.
pub struct TrainerRegistry {
    trainers: BTreeMap<JobType, Arc<JobTrainer>>,
}

impl TrainerRegistry {
    /// Probes every job type concurrently and waits for all probes.
    pub async fn probe(accessor: Arc<ResourceAccessor>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self::probe_types(&JobType::ALL, accessor, identity).await
    }

    pub async fn probe_types(
        job_types: &[JobType],
        accessor: Arc<ResourceAccessor>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let probes = job_types
            .iter()
            .map(|job_type| JobTrainer::probe(*job_type, accessor.clone(), identity.clone()));
        let registry = Self::from_trainers(join_all(probes).await);
        info!(enabled = ?registry.enabled(), "trainer registry ready");
        registry
    }

    /// # Panics
    ///
    /// If two trainers share a job type.
    pub fn from_trainers(trainers: impl IntoIterator<Item = JobTrainer>) -> Self {
        let mut map = BTreeMap::new();
        for trainer in trainers {
            let job_type = trainer.job_type();
            let previous = map.insert(job_type, Arc::new(trainer));
            assert!(previous.is_none(), "duplicate trainer registered for {job_type}");
        }
        Self { trainers: map }
    }

    /// Same trainers and probe results, reading through `accessor`. Nothing is re-probed.
    pub fn rebind(&self, accessor: Arc<ResourceAccessor>) -> Self {
        Self::from_trainers(
            self.trainers
                .values()
                .map(|trainer| trainer.rebind(accessor.clone())),
        )
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn Trainer>> {
        self.trainers
            .get(&job_type)
            .map(|trainer| trainer.clone() as Arc<dyn Trainer>)
    }

    pub fn all(&self) -> BTreeMap<JobType, Arc<dyn Trainer>> {
        self.trainers
            .iter()
            .map(|(job_type, trainer)| (*job_type, trainer.clone() as Arc<dyn Trainer>))
            .collect()
    }

    pub fn enabled(&self) -> Vec<JobType> {
        self.trainers
            .values()
            .filter(|trainer| trainer.is_enabled())
            .map(|trainer| trainer.job_type())
            .collect()
    }

    pub fn is_enabled(&self, job_type: JobType) -> bool {
        self.trainers
            .get(&job_type)
            .is_some_and(|trainer| trainer.is_enabled())
    }
}
