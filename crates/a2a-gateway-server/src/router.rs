//! HTTP application: agent routing, registration API and health.

use std::sync::Arc;

use a2a_gateway_core::{AgentRef, GatewayError};
use axum::{
    Router,
    extract::State,
    http::{Method, Uri},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use bytes::Bytes;
use tower_http::trace::TraceLayer;

use crate::{admin, error::ApiError, registry::AgentRegistry};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AgentRegistry>,
    pub route_prefix: Arc<str>,
}

/// Build the gateway application.
///
/// Agents are served under `{route_prefix}/{namespace}/{name}`; the
/// registration API lives under `/api/agents`.
pub fn app(registry: Arc<AgentRegistry>, route_prefix: &str) -> Router {
    let state = AppState {
        registry,
        route_prefix: Arc::from(normalize_prefix(route_prefix)),
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/agents", get(admin::list_agents))
        .route(
            "/api/agents/{namespace}/{name}",
            put(admin::put_agent).delete(admin::delete_agent),
        )
        .fallback(route)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// Dispatch a request to the agent named in its path.
async fn route(State(state): State<AppState>, method: Method, uri: Uri, body: Bytes) -> Response {
    let path = uri.path();
    let (agent, rest) = match parse_agent_path(&state.route_prefix, path) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(%method, path, kind = %e.kind(), "unroutable request: {e}");
            return ApiError(e).into_response();
        }
    };

    let Some(server) = state.registry.lookup(&agent).await else {
        tracing::info!(%agent, %method, path, "no agent registered");
        return ApiError(GatewayError::NotFound(format!("agent {agent}"))).into_response();
    };
    server.handle(&method, rest, &body).await
}

/// Split `path` into the agent reference and the path below the agent.
///
/// # Errors
/// `NotFound` for a path outside `prefix`, `BadRequest` for a missing or
/// invalid namespace or name.
pub fn parse_agent_path<'a>(prefix: &str, path: &'a str) -> Result<(AgentRef, &'a str), GatewayError> {
    let prefix = normalize_prefix(prefix);
    let below = path
        .strip_prefix(prefix)
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
        .ok_or_else(|| GatewayError::NotFound(format!("no route for {path}")))?;

    let mut parts = below.trim_start_matches('/').splitn(3, '/');
    let namespace = parts.next().unwrap_or_default();
    let name = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default();
    if namespace.is_empty() || name.is_empty() {
        return Err(GatewayError::BadRequest(format!(
            "path {path} does not name an agent as {prefix}/{{namespace}}/{{name}}"
        )));
    }
    Ok((AgentRef::new(namespace, name)?, rest))
}

fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_path() {
        let (agent, rest) = parse_agent_path("/api/a2a", "/api/a2a/kagent/k8s-agent").unwrap();
        assert_eq!(agent.to_string(), "kagent/k8s-agent");
        assert_eq!(rest, "");

        let (agent, rest) = parse_agent_path("/api/a2a/", "/api/a2a/kagent/k8s-agent/.well-known/agent.json").unwrap();
        assert_eq!(agent.to_string(), "kagent/k8s-agent");
        assert_eq!(rest, ".well-known/agent.json");

        let (_, rest) = parse_agent_path("/api/a2a", "/api/a2a/kagent/k8s-agent/").unwrap();
        assert_eq!(rest, "");
    }

    #[test]
    fn test_paths_outside_prefix_are_not_found() {
        for path in ["/", "/other/kagent/x", "/api/a2aextra/kagent/x"] {
            assert!(
                matches!(parse_agent_path("/api/a2a", path), Err(GatewayError::NotFound(_))),
                "{path}"
            );
        }
    }

    #[test]
    fn test_missing_or_invalid_segments_are_bad_requests() {
        for path in ["/api/a2a", "/api/a2a/", "/api/a2a/kagent", "/api/a2a/kagent/", "/api/a2a//x", "/api/a2a/k%20a/x"] {
            assert!(
                matches!(parse_agent_path("/api/a2a", path), Err(GatewayError::BadRequest(_))),
                "{path}"
            );
        }
    }
}
