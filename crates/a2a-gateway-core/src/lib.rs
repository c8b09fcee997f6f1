//! Core abstractions for the A2A agent gateway.
//!
//! This crate provides the fundamental building blocks:
//! - `protocol` - A2A wire types and the JSON-RPC envelope
//! - `AgentRef` - Namespace-qualified routing key
//! - `GatewayError` - Error taxonomy shared by every component
//! - `AgentClient` / `TaskManager` - Backend and task-management contracts
//! - `EventLog` - Broadcast + history for task resubscription

pub mod agent_ref;
pub mod error;
pub mod event_log;
pub mod protocol;
pub mod traits;

pub use agent_ref::AgentRef;
pub use error::{ErrorKind, GatewayError, Operation};
pub use event_log::EventLog;
pub use traits::{AgentClient, EventStream, TaskManager};
