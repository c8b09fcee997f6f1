//! Passthrough task management and agent backend clients.
//!
//! Provides:
//! - `PassthroughTaskManager` - Task-manager contract delegating to one backend
//! - `HttpAgentClient` - A2A JSON-RPC/SSE client for HTTP backends
//! - `InMemoryAgent` - In-process backend (feature: memory)

pub mod client;
#[cfg(feature = "memory")]
pub mod memory;
pub mod passthrough;

pub use client::HttpAgentClient;
#[cfg(feature = "memory")]
pub use memory::InMemoryAgent;
pub use passthrough::{DEFAULT_EXECUTION_TIMEOUT, PassthroughTaskManager, TaskManagerConfig};
