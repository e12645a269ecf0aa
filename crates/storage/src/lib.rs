pub mod backend;
pub mod error;
mod key;
mod multipart;
mod object;

pub use crate::backend::ObjectStore;
pub use crate::key::validate as validate_key;
pub use crate::multipart::{MULTIPART_THRESHOLD, PART_SIZE, PartProgress, upload_large};
pub use crate::object::{ObjectEntry, ObjectMeta, ObjectRead, PartEtag};
use std::sync::Arc;

pub type StoreHandle = Arc<dyn ObjectStore + Send + Sync>;
