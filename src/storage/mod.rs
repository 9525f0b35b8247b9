//! Storage adapters and the multi-endpoint orchestrator built on top of them.

mod adapter;
mod in_memory;
mod local_fs;
mod orchestrator;

pub use adapter::{StorageAdapter, StorageAdapterError, StorageMetadata};
pub use in_memory::{FaultConfig, InMemoryAdapter};
pub use local_fs::LocalFsAdapter;
pub use orchestrator::{EndpointHealth, EndpointRole, StorageOrchestrator};
