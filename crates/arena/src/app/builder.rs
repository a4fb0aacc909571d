use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;
use tracing::warn;

use crate::access::AccessError;
use crate::access::AccessMode;
use crate::access::CacheMirror;
use crate::access::ResourceAccessor;
use crate::access::ResourceKind;
use crate::app::AppError;
use crate::app::ArenaContext;
use crate::config::Settings;
use crate::infrastructure::kube_client::init_kube_client;
use crate::infrastructure::ClusterClient;
use crate::infrastructure::KubeClusterClient;
use crate::training::IdentityProvider;
use crate::training::JobType;
use crate::training::TrainerRegistry;
use crate::training::TrainingService;

/// Builds the [`ArenaContext`]
pub struct ContextBuilder {
    settings: Settings,
    client: Option<Arc<dyn ClusterClient>>,
}

impl ContextBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            client: None,
        }
    }

    /// Uses `client` instead of connecting with the configured kubeconfig.
    pub fn with_client(mut self, client: Arc<dyn ClusterClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Probes every job type, then starts the mirror when cached access is requested.
    ///
    /// # Errors
    ///
    /// - [`AppError::Connect`] if no client can be created
    /// - [`AppError::CacheSync`] if the mirror does not synchronize and
    ///   falling back to direct access is disabled
    pub async fn build(self) -> Result<ArenaContext, Report<AppError>> {
        info!(access_mode = %self.settings.access_mode, "Building arena context...");

        let client = match &self.client {
            Some(client) => client.clone(),
            None => {
                let kube = init_kube_client(
                    self.settings.kubeconfig.clone(),
                    self.settings.kube_context.clone(),
                )
                .await
                .change_context(AppError::Connect)?;
                Arc::new(KubeClusterClient::new(kube)) as Arc<dyn ClusterClient>
            }
        };

        let identity: Arc<dyn IdentityProvider> = Arc::new(self.settings.identity.clone());
        let direct = Arc::new(ResourceAccessor::direct(client.clone()));
        let registry = TrainerRegistry::probe(direct.clone(), identity.clone()).await;

        let (accessor, mirror, registry) = match self.settings.access_mode {
            AccessMode::Direct => (direct, None, registry),
            AccessMode::Cached => match self.start_mirror(&client, registry.enabled()).await {
                Ok(mirror) => {
                    let cached = Arc::new(ResourceAccessor::cached(client.clone(), mirror.clone()));
                    let registry = registry.rebind(cached.clone());
                    (cached, Some(mirror), registry)
                }
                Err(report) if self.settings.fallback_to_direct => {
                    warn!("Cache mirror unavailable, falling back to direct access: {report:?}");
                    (direct, None, registry)
                }
                Err(report) => return Err(report.change_context(AppError::CacheSync)),
            },
        };

        let registry = Arc::new(registry);
        let service = TrainingService::new(registry.clone(), accessor.clone());
        info!(access_mode = %accessor.mode(), "Arena context ready");

        Ok(ArenaContext {
            client,
            accessor,
            mirror,
            registry,
            identity,
            service,
            namespace: self.settings.namespace,
        })
    }

    async fn start_mirror(
        &self,
        client: &Arc<dyn ClusterClient>,
        enabled: Vec<JobType>,
    ) -> Result<Arc<CacheMirror>, Report<AccessError>> {
        let kinds = ResourceKind::BUILTIN
            .into_iter()
            .chain(enabled.into_iter().map(JobType::kind));
        let mirror = Arc::new(CacheMirror::new(client.clone(), kinds));
        mirror.index_pods_by_node();

        let timeout = self.settings.cache_sync_timeout;
        match tokio::time::timeout(timeout, mirror.start()).await {
            Ok(result) => result?,
            Err(_) => {
                mirror.stop();
                return Err(Report::new(AccessError::CacheSync {
                    message: format!("initial synchronization did not finish within {timeout:?}"),
                }));
            }
        }
        Ok(mirror)
    }
}
