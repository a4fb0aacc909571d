use core::error::Error;

use crate::access::ResourceKind;

/// Errors returned by the resource accessor and the cache mirror.
#[derive(Debug, derive_more::Display)]
pub enum AccessError {
    #[display("Invalid selector `{selector}`")]
    SelectorParse { selector: String },
    #[display("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },
    #[display("Failed to read {kind} {namespace}/{name} from the cluster")]
    Backend {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },
    #[display("Cache mirror failed to synchronize: {message}")]
    CacheSync { message: String },
    #[display("Failed to decode {kind} object")]
    Conversion { kind: ResourceKind },
    #[display("Failed to probe custom resource definition {crd_name}")]
    Probe { crd_name: String },
}

impl Error for AccessError {}

impl AccessError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn backend(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Self {
        Self::Backend {
            kind,
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn not_found(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        }
    }
}
