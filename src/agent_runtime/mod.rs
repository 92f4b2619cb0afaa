//! Agent runtime: supervision and proxying for a fleet of MCP backends.
//!
//! The runtime keeps a pool of STDIO subprocesses, routes JSON-RPC requests
//! to the transport that owns each logical server, starts and stops
//! deployments across local-process and Docker Compose execution backends,
//! and drives health probing with bounded auto-restart. The module follows
//! hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]
//! - The caller-facing error taxonomy in [`error`]

pub mod adapters;
pub mod domain;
pub mod error;
pub mod ports;
pub mod services;
