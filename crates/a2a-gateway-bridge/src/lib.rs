//! Remote state bridge for stateless agent backends.
//!
//! Provides:
//! - `StoreClient` - User-scoped HTTP client for the central store
//! - `TypedBlob` - Opaque typed payloads (JSON or bytes, base64 on the wire)
//! - `SessionStore` - Sessions with append-only event logs
//! - `CheckpointStore` - Branching checkpoint graph with pending writes
//! - `MemoryStore` - Scored memory and per-method flow state
//! - `StateBridge` - Picks the store matching a backend's `StateModel`

pub mod blob;
pub mod checkpoint;
pub mod client;
pub mod memory;
pub mod session;
pub mod state;

pub use blob::{BlobType, TypedBlob};
pub use checkpoint::{
    ChannelWrite, CheckpointRecord, CheckpointStore, CheckpointTuple, PendingWrite, RemoteCheckpointStore,
    ThreadScope, new_checkpoint_id,
};
pub use client::{CallContext, StoreClient, StoreConfig, USER_ID_HEADER};
pub use memory::{FlowState, MemoryItem, MemoryStore, NewMemory, RemoteMemoryStore, ScoreOrder};
pub use session::{EventQuery, NewSession, RemoteSessionStore, Session, SessionEvent, SessionStore, SessionUpdate};
pub use state::{StateBridge, StateModel};
