pub mod error;
mod key;
mod store;

pub use crate::key::{CacheKey, KeyScheme};
pub use crate::store::{ArtifactRole, ArtifactStore, Coverage, Resolution};
