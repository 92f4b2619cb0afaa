//! In-memory adapters for tests and single-process deployments.

mod backend;
mod repository;

pub use backend::InMemoryExecutionBackend;
pub use repository::InMemoryRuntimeRepository;
