//! Selecting the store variant matching a backend's native state model.

use std::{fmt, str::FromStr, sync::Arc};

use a2a_gateway_core::GatewayError;
use serde::{Deserialize, Serialize};

use crate::{
    checkpoint::{CheckpointStore, RemoteCheckpointStore},
    client::StoreClient,
    memory::{MemoryStore, RemoteMemoryStore},
    session::{RemoteSessionStore, SessionStore},
};

/// Native state topology of an agent backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateModel {
    /// Sessions with an append-only event log.
    SessionLog,
    /// Branching graph of immutable checkpoints.
    CheckpointGraph,
    /// Scored memory plus per-method flow state.
    ScoredMemory,
}

impl StateModel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionLog => "session_log",
            Self::CheckpointGraph => "checkpoint_graph",
            Self::ScoredMemory => "scored_memory",
        }
    }
}

impl fmt::Display for StateModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateModel {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_log" => Ok(Self::SessionLog),
            "checkpoint_graph" => Ok(Self::CheckpointGraph),
            "scored_memory" => Ok(Self::ScoredMemory),
            other => Err(GatewayError::BadRequest(format!("Unknown state model: {other}"))),
        }
    }
}

/// The one store a backend consumes.
#[derive(Clone)]
pub enum StateBridge {
    SessionLog(Arc<dyn SessionStore>),
    CheckpointGraph(Arc<dyn CheckpointStore>),
    ScoredMemory(Arc<dyn MemoryStore>),
}

impl StateBridge {
    /// Bridge for `model` talking to the central store through `client`.
    #[must_use]
    pub fn remote(model: StateModel, client: StoreClient) -> Self {
        match model {
            StateModel::SessionLog => Self::SessionLog(Arc::new(RemoteSessionStore::new(client))),
            StateModel::CheckpointGraph => Self::CheckpointGraph(Arc::new(RemoteCheckpointStore::new(client))),
            StateModel::ScoredMemory => Self::ScoredMemory(Arc::new(RemoteMemoryStore::new(client))),
        }
    }

    #[must_use]
    pub const fn model(&self) -> StateModel {
        match self {
            Self::SessionLog(_) => StateModel::SessionLog,
            Self::CheckpointGraph(_) => StateModel::CheckpointGraph,
            Self::ScoredMemory(_) => StateModel::ScoredMemory,
        }
    }

    #[must_use]
    pub fn sessions(&self) -> Option<&Arc<dyn SessionStore>> {
        match self {
            Self::SessionLog(store) => Some(store),
            _ => None,
        }
    }

    #[must_use]
    pub fn checkpoints(&self) -> Option<&Arc<dyn CheckpointStore>> {
        match self {
            Self::CheckpointGraph(store) => Some(store),
            _ => None,
        }
    }

    #[must_use]
    pub fn memory(&self) -> Option<&Arc<dyn MemoryStore>> {
        match self {
            Self::ScoredMemory(store) => Some(store),
            _ => None,
        }
    }
}

impl fmt::Debug for StateBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateBridge").field(&self.model()).finish()
    }
}
