use core::error::Error;

use crate::training::JobType;

/// Errors returned by trainers and the training service.
#[derive(Debug, derive_more::Display)]
pub enum TrainingError {
    #[display("Training job {name} not found in namespace {namespace}")]
    JobNotFound { name: String, namespace: String },
    #[display("No privileges to access training job {name} in namespace {namespace}")]
    NoPrivileges { name: String, namespace: String },
    #[display("Job type {job_type} is not supported on this cluster")]
    Unsupported { job_type: JobType },
    #[display("There is more than one training job named {name} ({job_types}), please set the job type")]
    AmbiguousJobName { name: String, job_types: String },
    #[display("Failed to read training jobs: {message}")]
    Backend { message: String },
    #[display("Failed to delete {failures} associated resources")]
    DeleteFailed { failures: usize },
    #[display("Invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl Error for TrainingError {}

impl TrainingError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::JobNotFound { .. })
    }

    pub(crate) fn not_found(name: &str, namespace: &str) -> Self {
        Self::JobNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
