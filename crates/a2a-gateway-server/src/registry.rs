//! Live table of registered agents.

use std::{collections::HashMap, sync::Arc};

use a2a_gateway_core::{AgentClient, AgentRef, GatewayError, protocol::AgentCard};
use a2a_gateway_tasks::{PassthroughTaskManager, TaskManagerConfig};
use tokio::sync::RwLock;

use crate::a2a::A2aServer;

/// Registry mapping `namespace/name` to the agent's protocol server.
///
/// Lookups take the read lock and clone an `Arc`, so a request keeps using
/// the server it resolved even if the agent is replaced or removed while the
/// request is in flight.
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentRef, Arc<A2aServer>>>,
    task_config: TaskManagerConfig,
    stream_buffer: usize,
}

impl AgentRegistry {
    #[must_use]
    pub fn new(task_config: TaskManagerConfig, stream_buffer: usize) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            task_config,
            stream_buffer: stream_buffer.max(1),
        }
    }

    /// Register `agent`, replacing any previous registration.
    ///
    /// # Errors
    /// Returns `BadRequest` if the card is invalid; the registry is left
    /// unchanged in that case.
    pub async fn register(
        &self,
        agent: AgentRef,
        client: Arc<dyn AgentClient>,
        card: AgentCard,
    ) -> Result<(), GatewayError> {
        card.validate()?;
        let manager = PassthroughTaskManager::new(agent.clone(), client, self.task_config);
        let server = Arc::new(A2aServer::new(card, Arc::new(manager), self.stream_buffer));

        let replaced = self.agents.write().await.insert(agent.clone(), server).is_some();
        tracing::info!(%agent, replaced, "agent registered");
        Ok(())
    }

    /// Remove `agent`; returns whether it was registered.
    pub async fn unregister(&self, agent: &AgentRef) -> bool {
        let removed = self.agents.write().await.remove(agent).is_some();
        if removed {
            tracing::info!(%agent, "agent unregistered");
        }
        removed
    }

    pub async fn lookup(&self, agent: &AgentRef) -> Option<Arc<A2aServer>> {
        self.agents.read().await.get(agent).cloned()
    }

    pub async fn contains(&self, agent: &AgentRef) -> bool {
        self.agents.read().await.contains_key(agent)
    }

    /// Registered agents with their cards, ordered by reference.
    pub async fn list(&self) -> Vec<(AgentRef, AgentCard)> {
        let mut agents: Vec<_> = self
            .agents
            .read()
            .await
            .iter()
            .map(|(agent, server)| (agent.clone(), server.card().clone()))
            .collect();
        agents.sort_by(|a, b| a.0.cmp(&b.0));
        agents
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }
}
