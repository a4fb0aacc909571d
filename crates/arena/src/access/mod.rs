//! Read access to cluster state, either direct or through a local mirror.

mod accessor;
mod errors;
mod kinds;
pub mod mirror;
pub mod selector;
mod strategy;

pub use accessor::ResourceAccessor;
pub use errors::AccessError;
pub use kinds::from_dynamic;
pub use kinds::to_dynamic;
pub use kinds::AccessibleResource;
pub use kinds::ResourceKind;
pub use mirror::CacheMirror;
pub use selector::FieldSelector;
pub use selector::LabelSelector;
pub use selector::SelectorError;
pub use strategy::AccessMode;
pub use strategy::AccessStrategy;
pub use strategy::ListQuery;
