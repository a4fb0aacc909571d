use std::path::Path;
use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;

use crate::access::AccessMode;
use crate::config::ConfigError;

/// Settings read from the YAML configuration file; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct FileConfig {
    pub kubeconfig: Option<PathBuf>,
    pub kube_context: Option<String>,
    pub namespace: Option<String>,
    pub access_mode: Option<AccessMode>,
    pub cache_sync_timeout_secs: Option<u64>,
    pub fallback_to_direct: Option<bool>,
    pub isolate_user_in_namespace: Option<bool>,
    pub user_id: Option<String>,
    pub admin: Option<bool>,
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    /// # Errors
    ///
    /// - [`ConfigError::Read`] if the file cannot be read
    /// - [`ConfigError::Parse`] if it is not a valid configuration
    pub fn load(path: &Path) -> Result<Self, Report<ConfigError>> {
        let content = std::fs::read_to_string(path).change_context_lazy(|| ConfigError::Read {
            path: path.to_path_buf(),
        })?;
        Self::parse(&content).attach_printable_lazy(|| format!("in {}", path.display()))
    }

    /// # Errors
    ///
    /// - [`ConfigError::Parse`] if `content` is not a valid configuration
    pub fn parse(content: &str) -> Result<Self, Report<ConfigError>> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).change_context(ConfigError::Parse)
    }
}
