pub mod destination;
pub mod service;

pub use destination::{Backoff, ExportDestination};
pub use service::ExportService;
