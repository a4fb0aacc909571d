//! Training jobs normalized across job types.

mod chief;
pub mod crds;
mod errors;
pub mod gpu;
mod identity;
mod job;
mod job_object;
mod job_type;
pub mod pods;
mod registry;
mod service;
pub mod status;
mod trainer;

pub use chief::select_members;
pub use chief::Members;
pub use errors::TrainingError;
pub use identity::IdentityProvider;
pub use identity::StaticIdentity;
pub use identity::USER_ID_LABEL;
pub use job::TrainingJob;
pub use job_object::JobObject;
pub use job_object::ReportedState;
pub use job_type::JobType;
pub use job_type::StatusFamily;
pub use job_type::UnknownJobType;
pub use registry::TrainerRegistry;
pub use service::TrainingService;
pub use trainer::JobTrainer;
pub use trainer::Trainer;
