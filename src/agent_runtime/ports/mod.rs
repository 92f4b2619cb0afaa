//! Port contracts for the agent runtime.

mod backend;
mod command;
mod failure;
mod repository;

pub use backend::{BackendError, BackendResult, BackendStatus, ExecutionBackend, StartedInstance};
pub use command::{CommandError, CommandOutput, CommandRunner};
pub use failure::{FailureDisposition, FailureHandler};
pub use repository::{RepositoryError, RuntimeRepository, RuntimeRepositoryResult};
