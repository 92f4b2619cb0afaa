//! mcp-fleet: supervision and proxying for a fleet of MCP backends.
//!
//! The crate runs MCP servers speaking JSON-RPC 2.0 as pooled subprocesses,
//! local processes, or Docker Compose services, and exposes all of them
//! behind one proxy endpoint with health checking and bounded auto-restart.
//!
//! # Architecture
//!
//! The runtime follows hexagonal architecture principles:
//!
//! - **Domain**: Pure supervision logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for persistence, execution, and the
//!   container engine
//! - **Adapters**: Concrete implementations of ports (subprocesses, Docker
//!   Compose, in-memory state)
//!
//! # Modules
//!
//! - [`agent_runtime`]: Process pool, proxy router, deployments, health, and
//!   restarts
//! - [`config`]: TOML configuration for the daemon
//! - [`http`]: Operator HTTP surface

pub mod agent_runtime;
pub mod config;
pub mod http;
