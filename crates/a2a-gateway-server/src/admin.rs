//! Registration API driven by the external controller.

use std::{collections::HashMap, path::Path, sync::Arc};

use a2a_gateway_core::{AgentRef, GatewayError, protocol::AgentCard};
use a2a_gateway_tasks::HttpAgentClient;
use axum::{
    Json,
    extract::{Path as UrlPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, registry::AgentRegistry, router::AppState};

/// Backend registration as sent by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Backend A2A endpoint.
    pub url: String,
    pub card: AgentCard,
    /// Headers sent with every backend call.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// One entry of the agents file, or of `GET /api/agents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub namespace: String,
    pub name: String,
    #[serde(flatten)]
    pub spec: AgentSpec,
}

#[derive(Serialize)]
pub(crate) struct AgentView {
    agent: AgentRef,
    card: AgentCard,
}

/// Register an HTTP backend under `agent`.
///
/// # Errors
/// Returns `BadRequest` for an invalid card or header.
pub async fn register_http(registry: &AgentRegistry, agent: AgentRef, spec: AgentSpec) -> Result<(), GatewayError> {
    let client = HttpAgentClient::with_headers(spec.url, &spec.headers)?;
    registry.register(agent, Arc::new(client), spec.card).await
}

/// Install every registration listed in the JSON file at `path`.
///
/// Returns the number of agents registered.
///
/// # Errors
/// Returns `BadRequest` if the file cannot be read or parsed, or if any
/// entry is invalid. Entries before the offending one stay registered.
pub async fn preload_file(registry: &AgentRegistry, path: &Path) -> Result<usize, GatewayError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("Failed to read agents file {}: {e}", path.display())))?;
    let entries: Vec<AgentEntry> = serde_json::from_slice(&raw)
        .map_err(|e| GatewayError::BadRequest(format!("Invalid agents file {}: {e}", path.display())))?;

    let count = entries.len();
    for entry in entries {
        let agent = AgentRef::new(entry.namespace, entry.name)?;
        register_http(registry, agent, entry.spec).await?;
    }
    tracing::info!(count, path = %path.display(), "agents preloaded");
    Ok(count)
}

pub(crate) async fn put_agent(
    State(state): State<AppState>,
    UrlPath((namespace, name)): UrlPath<(String, String)>,
    Json(spec): Json<AgentSpec>,
) -> Result<Response, ApiError> {
    let agent = AgentRef::new(namespace, name)?;
    let card = spec.card.clone();
    register_http(&state.registry, agent.clone(), spec).await?;
    Ok(Json(AgentView { agent, card }).into_response())
}

pub(crate) async fn delete_agent(
    State(state): State<AppState>,
    UrlPath((namespace, name)): UrlPath<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let agent = AgentRef::new(namespace, name)?;
    state.registry.unregister(&agent).await;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentView>> {
    let agents = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|(agent, card)| AgentView { agent, card })
        .collect();
    Json(agents)
}
