pub mod cluster;
pub mod kube_client;
pub mod kube_cluster;

pub use cluster::ClusterClient;
pub use cluster::ClusterError;
pub use cluster::WatchStream;
pub use kube_cluster::KubeClusterClient;
