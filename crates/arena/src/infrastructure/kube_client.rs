use std::path::PathBuf;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::infrastructure::cluster::ClusterError;

/// Builds a client from `kubeconfig`, or from the in-cluster / default config.
///
/// `context` selects a kubeconfig context other than the current one.
///
/// # Errors
///
/// - [`ClusterError::ConnectionFailed`] if the configuration cannot be loaded
pub async fn init_kube_client(
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
) -> Result<Client, Report<ClusterError>> {
    let options = KubeConfigOptions {
        context,
        ..Default::default()
    };

    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig =
                Kubeconfig::read_from(&path).change_context(ClusterError::ConnectionFailed {
                    message: format!("Failed to read kubeconfig file: {}", path.display()),
                })?;
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .change_context(ClusterError::ConnectionFailed {
                    message: format!("Failed to create config from kubeconfig: {}", path.display()),
                })?
        }
        None if options.context.is_some() => Config::from_kubeconfig(&options)
            .await
            .change_context(ClusterError::ConnectionFailed {
                message: "Failed to load the default kubeconfig".to_string(),
            })?,
        None => Config::infer()
            .await
            .change_context(ClusterError::ConnectionFailed {
                message: "Failed to infer Kubernetes configuration".to_string(),
            })?,
    };

    Client::try_from(config).change_context(ClusterError::ConnectionFailed {
        message: "Failed to create Kubernetes client".to_string(),
    })
}
