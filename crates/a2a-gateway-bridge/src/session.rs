//! Flat session store: session records and their append-only event logs.

use a2a_gateway_core::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    blob::TypedBlob,
    client::{CallContext, StoreClient, StoreRequest},
};

/// A conversation session owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a new session; the store assigns an id when none is given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// Partial update; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// One entry of a session's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub data: TypedBlob,
}

/// Event filter for [`SessionStore::list_events`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Only events created strictly after this instant.
    pub after: Option<DateTime<Utc>>,
    /// At most this many events.
    pub limit: Option<usize>,
}

#[derive(Serialize)]
struct NewEvent<'a> {
    data: &'a TypedBlob,
}

#[derive(Serialize)]
struct AppendEvents<'a> {
    events: Vec<NewEvent<'a>>,
}

/// Session persistence for backends with a flat, append-only state model.
///
/// Every call is scoped by `user_id`; one user can never see another
/// user's sessions or events.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session.
    async fn create_session(&self, user_id: &str, session: NewSession) -> Result<Session, GatewayError>;

    /// Get a session; `None` when it does not exist for this user.
    async fn get_session(&self, user_id: &str, session_id: &str) -> Result<Option<Session>, GatewayError>;

    /// List the user's sessions.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, GatewayError>;

    /// Update a session's mutable fields.
    async fn update_session(
        &self,
        user_id: &str,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<Session, GatewayError>;

    /// Delete a session and its events.
    async fn delete_session(&self, user_id: &str, session_id: &str) -> Result<(), GatewayError>;

    /// Append events to a session's log, in order.
    ///
    /// Not idempotent: a failed append must not be blindly retried.
    async fn append_events(
        &self,
        user_id: &str,
        session_id: &str,
        events: &[TypedBlob],
    ) -> Result<Vec<SessionEvent>, GatewayError>;

    /// List a session's events in creation order.
    async fn list_events(
        &self,
        user_id: &str,
        session_id: &str,
        query: EventQuery,
    ) -> Result<Vec<SessionEvent>, GatewayError>;
}

/// [`SessionStore`] backed by the central store.
#[derive(Debug, Clone)]
pub struct RemoteSessionStore {
    client: StoreClient,
}

impl RemoteSessionStore {
    #[must_use]
    pub const fn new(client: StoreClient) -> Self {
        Self { client }
    }
}

fn session_ctx(operation: &'static str, user_id: &str, session_id: &str) -> CallContext {
    CallContext::new(operation)
        .with("user", user_id)
        .with("session", session_id)
}

#[async_trait]
impl SessionStore for RemoteSessionStore {
    async fn create_session(&self, user_id: &str, session: NewSession) -> Result<Session, GatewayError> {
        let ctx = CallContext::new("session.create").with("user", user_id);
        let request = StoreRequest::new(Method::POST, &["sessions"]).body(&ctx, &session)?;
        let created: Session = self
            .client
            .send(&ctx, user_id, request)
            .await?
            .ok_or_else(|| ctx.not_found("sessions endpoint"))?;
        tracing::info!(user_id, session_id = %created.id, "session created");
        Ok(created)
    }

    async fn get_session(&self, user_id: &str, session_id: &str) -> Result<Option<Session>, GatewayError> {
        let ctx = session_ctx("session.get", user_id, session_id);
        let request = StoreRequest::new(Method::GET, &["sessions", session_id]);
        let session: Option<Option<Session>> = self.client.send(&ctx, user_id, request).await?;
        Ok(session.flatten())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, GatewayError> {
        let ctx = CallContext::new("session.list").with("user", user_id);
        let request = StoreRequest::new(Method::GET, &["sessions"]);
        let sessions: Option<Option<Vec<Session>>> = self.client.send(&ctx, user_id, request).await?;
        Ok(sessions.flatten().unwrap_or_default())
    }

    async fn update_session(
        &self,
        user_id: &str,
        session_id: &str,
        update: SessionUpdate,
    ) -> Result<Session, GatewayError> {
        let ctx = session_ctx("session.update", user_id, session_id);
        let request = StoreRequest::new(Method::PATCH, &["sessions", session_id]).body(&ctx, &update)?;
        self.client
            .send(&ctx, user_id, request)
            .await?
            .ok_or_else(|| ctx.not_found(format!("session {session_id}")))
    }

    async fn delete_session(&self, user_id: &str, session_id: &str) -> Result<(), GatewayError> {
        let ctx = session_ctx("session.delete", user_id, session_id);
        let request = StoreRequest::new(Method::DELETE, &["sessions", session_id]);
        let deleted: Option<serde::de::IgnoredAny> = self.client.send(&ctx, user_id, request).await?;
        if deleted.is_none() {
            return Err(ctx.not_found(format!("session {session_id}")));
        }
        tracing::info!(user_id, session_id, "session deleted");
        Ok(())
    }

    async fn append_events(
        &self,
        user_id: &str,
        session_id: &str,
        events: &[TypedBlob],
    ) -> Result<Vec<SessionEvent>, GatewayError> {
        let ctx = session_ctx("session.append_events", user_id, session_id).with("count", events.len());
        if events.is_empty() {
            return Ok(Vec::new());
        }
        let body = AppendEvents {
            events: events.iter().map(|data| NewEvent { data }).collect(),
        };
        let request = StoreRequest::new(Method::POST, &["sessions", session_id, "events"]).body(&ctx, &body)?;
        let appended: Option<Vec<SessionEvent>> = self.client.send(&ctx, user_id, request).await?;
        appended.ok_or_else(|| ctx.not_found(format!("session {session_id}")))
    }

    async fn list_events(
        &self,
        user_id: &str,
        session_id: &str,
        query: EventQuery,
    ) -> Result<Vec<SessionEvent>, GatewayError> {
        let ctx = session_ctx("session.list_events", user_id, session_id);
        let mut request = StoreRequest::new(Method::GET, &["sessions", session_id, "events"]);
        if let Some(after) = query.after {
            request = request.query("after", after.to_rfc3339());
        }
        if let Some(limit) = query.limit {
            request = request.query("limit", limit);
        }
        let mut events: Vec<SessionEvent> = self
            .client
            .send(&ctx, user_id, request)
            .await?
            .ok_or_else(|| ctx.not_found(format!("session {session_id}")))?;

        // Enforce the log's ordering and filters whatever the store did.
        events.sort_by_key(|e| e.created_at);
        if let Some(after) = query.after {
            events.retain(|e| e.created_at > after);
        }
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        Ok(events)
    }
}
