//! Construction of the process-wide components.

mod builder;
mod context;

pub use builder::ContextBuilder;
pub use context::ArenaContext;

#[derive(Debug, derive_more::Display)]
pub enum AppError {
    #[display("Failed to connect to the cluster")]
    Connect,
    #[display("Cache mirror did not synchronize")]
    CacheSync,
}

impl core::error::Error for AppError {}
