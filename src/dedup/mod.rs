//! Deduplication engine and reference counter: the core's top-level API,
//! tying the rate limiter, security scanner, storage orchestrator, and
//! metadata catalog into upload/download/delete/reclaim operations.

mod engine;
mod error;
mod models;
mod reference_counter;

pub use engine::DeduplicationEngine;
pub use error::DedupError;
pub use models::{DeduplicationStats, UploadMetadata, UploadResult};
pub use reference_counter::{IntegrityMismatch, ReferenceCounter};
