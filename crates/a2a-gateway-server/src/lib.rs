//! A2A agent gateway server.
//!
//! Provides:
//! - `AgentRegistry` - Live `namespace/name` to agent mapping
//! - `A2aServer` - Per-agent JSON-RPC, SSE and agent card endpoints
//! - `app` - HTTP application with routing and the registration API
//! - `GatewayConfig` - Flags and environment of the `a2a-gateway` binary

pub mod a2a;
pub mod admin;
pub mod config;
pub mod error;
pub mod registry;
pub mod router;

pub use a2a::A2aServer;
pub use admin::{AgentEntry, AgentSpec, preload_file, register_http};
pub use config::GatewayConfig;
pub use error::ApiError;
pub use registry::AgentRegistry;
pub use router::{AppState, app, parse_agent_path};
