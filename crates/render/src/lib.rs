pub mod cover;
pub mod error;
mod pages;
mod source;
mod tool;

pub use crate::cover::{CoverOutcome, CoverTier, extract_cover};
pub use crate::pages::{DocumentRenderer, PageOutcome, PageRenderer};
pub use crate::source::{Materialized, Source};
pub use crate::tool::Poppler;
