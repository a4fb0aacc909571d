pub mod access;
pub mod app;
pub mod arena_cache;
pub mod config;
pub mod infrastructure;
#[cfg(any(test, feature = "testing"))]
pub mod mock;
pub mod training;
