//! Command line and configuration file settings.

pub mod cli;
pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;

pub use cli::*;
pub use file::FileConfig;

use crate::access::AccessMode;
use crate::training::StaticIdentity;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, derive_more::Display)]
pub enum ConfigError {
    #[display("Failed to read configuration file {}", path.display())]
    Read { path: PathBuf },
    #[display("Failed to parse configuration")]
    Parse,
}

impl core::error::Error for ConfigError {}

/// Fully resolved settings: command line over file over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub kubeconfig: Option<PathBuf>,
    pub kube_context: Option<String>,
    pub namespace: String,
    pub access_mode: AccessMode,
    pub cache_sync_timeout: Duration,
    pub fallback_to_direct: bool,
    pub identity: StaticIdentity,
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::merge(&GlobalArgs::default(), FileConfig::default())
    }
}

impl Settings {
    /// Reads the configuration file named by `args`, if any, and merges.
    ///
    /// # Errors
    ///
    /// - any error of [`FileConfig::load`]
    pub fn load(args: &GlobalArgs) -> Result<Self, Report<ConfigError>> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(args, file))
    }

    pub fn merge(args: &GlobalArgs, file: FileConfig) -> Self {
        Self {
            kubeconfig: args.kubeconfig.clone().or(file.kubeconfig),
            kube_context: args.kube_context.clone().or(file.kube_context),
            namespace: args
                .namespace
                .clone()
                .or(file.namespace)
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            access_mode: args.access_mode.or(file.access_mode).unwrap_or_default(),
            cache_sync_timeout: args
                .cache_sync_timeout_secs
                .or(file.cache_sync_timeout_secs)
                .map_or(DEFAULT_CACHE_SYNC_TIMEOUT, Duration::from_secs),
            fallback_to_direct: args
                .fallback_to_direct
                .or(file.fallback_to_direct)
                .unwrap_or(true),
            identity: StaticIdentity {
                user_id: args.user_id.clone().or(file.user_id),
                admin: args.admin || file.admin.unwrap_or(false),
                isolate_user_in_namespace: args
                    .isolate_user_in_namespace
                    .or(file.isolate_user_in_namespace)
                    .unwrap_or(false),
            },
            log_file: args.log_file.clone().or(file.log_file),
        }
    }
}
