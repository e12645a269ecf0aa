pub mod catalog;
pub mod error;
mod scheduler;

#[cfg(any(test, feature = "mock"))]
pub use crate::catalog::MemoryCatalog;
pub use crate::catalog::{ArtifactState, Catalog, ItemType, SourceItem};
pub use crate::scheduler::{DEFAULT_ITEM_DELAY, ItemError, Progress, Scheduler, WorkOutcome, Worker};
