pub mod catalog;
pub mod proxy;
pub mod range;
pub mod server;
pub mod worker;

pub use crate::catalog::FsCatalog;
pub use crate::server::AppState;
pub use crate::worker::RenderWorker;
