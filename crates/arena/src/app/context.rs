use std::sync::Arc;

use tracing::info;

use crate::access::AccessMode;
use crate::access::CacheMirror;
use crate::access::ResourceAccessor;
use crate::infrastructure::ClusterClient;
use crate::training::IdentityProvider;
use crate::training::TrainerRegistry;
use crate::training::TrainingService;

/// Everything a command needs, built once at startup and shared by handle.
pub struct ArenaContext {
    pub client: Arc<dyn ClusterClient>,
    pub accessor: Arc<ResourceAccessor>,
    pub mirror: Option<Arc<CacheMirror>>,
    pub registry: Arc<TrainerRegistry>,
    pub identity: Arc<dyn IdentityProvider>,
    pub service: TrainingService,
    pub namespace: String,
}

impl ArenaContext {
    pub fn access_mode(&self) -> AccessMode {
        self.accessor.mode()
    }

    /// Stops the mirror's watch tasks, if any.
    pub fn shutdown(&self) {
        if let Some(mirror) = &self.mirror {
            info!("Stopping cache mirror");
            mirror.stop();
        }
    }
}
