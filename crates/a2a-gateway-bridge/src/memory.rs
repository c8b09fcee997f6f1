//! Scored memory and per-method flow state.

use std::cmp::Ordering;

use a2a_gateway_core::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    blob::TypedBlob,
    client::{CallContext, StoreClient, StoreRequest},
};

/// A remembered task outcome, visible only within its (thread, user) scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    #[serde(default)]
    pub id: String,
    pub thread_id: String,
    pub user_id: String,
    pub task_description: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Fields of a memory item to save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMemory {
    pub task_description: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Value,
}

impl NewMemory {
    #[must_use]
    pub fn new(task_description: impl Into<String>, score: f64) -> Self {
        Self {
            task_description: task_description.into(),
            score,
            metadata: Value::Null,
        }
    }
}

/// Which end of the score scale is more relevant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScoreOrder {
    #[default]
    HigherFirst,
    LowerFirst,
}

impl ScoreOrder {
    /// Sort by relevance, breaking ties by recency (newest first).
    pub fn rank(self, items: &mut [MemoryItem]) {
        items.sort_by(|a, b| {
            let by_score = match self {
                Self::HigherFirst => b.score.total_cmp(&a.score),
                Self::LowerFirst => a.score.total_cmp(&b.score),
            };
            match by_score {
                Ordering::Equal => b.created_at.cmp(&a.created_at),
                other => other,
            }
        });
    }
}

/// Latest saved state of one flow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowState {
    pub thread_id: String,
    pub flow_uuid: String,
    pub method_name: String,
    pub state: TypedBlob,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct SaveMemory<'a> {
    thread_id: &'a str,
    #[serde(flatten)]
    item: &'a NewMemory,
}

#[derive(Serialize)]
struct SaveFlowState<'a> {
    thread_id: &'a str,
    flow_uuid: &'a str,
    method_name: &'a str,
    state: &'a TypedBlob,
}

/// Memory and flow-state persistence for backends that recall scored
/// task outcomes and resume flows per method.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn save_memory(&self, user_id: &str, thread_id: &str, item: NewMemory) -> Result<MemoryItem, GatewayError>;

    /// Items matching `query`, most relevant first, at most `limit`.
    async fn load_memory(
        &self,
        user_id: &str,
        thread_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, GatewayError>;

    /// Delete every item of `thread_id`, leaving other threads untouched.
    async fn reset_memory(&self, user_id: &str, thread_id: &str) -> Result<(), GatewayError>;

    /// Upsert the state of a flow instance after `method_name` ran.
    async fn save_flow_state(
        &self,
        user_id: &str,
        thread_id: &str,
        flow_uuid: &str,
        method_name: &str,
        state: TypedBlob,
    ) -> Result<(), GatewayError>;

    /// Latest saved state of a flow instance; `None` for a new flow.
    async fn load_flow_state(
        &self,
        user_id: &str,
        thread_id: &str,
        flow_uuid: &str,
    ) -> Result<Option<FlowState>, GatewayError>;
}

/// [`MemoryStore`] backed by the central store.
///
/// The store does the matching; the bridge re-ranks with its [`ScoreOrder`]
/// so that equal scores come back in a deterministic order.
#[derive(Debug, Clone)]
pub struct RemoteMemoryStore {
    client: StoreClient,
    order: ScoreOrder,
}

impl RemoteMemoryStore {
    #[must_use]
    pub const fn new(client: StoreClient) -> Self {
        Self {
            client,
            order: ScoreOrder::HigherFirst,
        }
    }

    #[must_use]
    pub const fn with_score_order(mut self, order: ScoreOrder) -> Self {
        self.order = order;
        self
    }
}

fn memory_ctx(operation: &'static str, user_id: &str, thread_id: &str) -> CallContext {
    CallContext::new(operation)
        .with("user", user_id)
        .with("thread", thread_id)
}

#[async_trait]
impl MemoryStore for RemoteMemoryStore {
    async fn save_memory(&self, user_id: &str, thread_id: &str, item: NewMemory) -> Result<MemoryItem, GatewayError> {
        let ctx = memory_ctx("memory.save", user_id, thread_id);
        let body = SaveMemory {
            thread_id,
            item: &item,
        };
        let request = StoreRequest::new(Method::POST, &["memory"]).body(&ctx, &body)?;
        self.client
            .send(&ctx, user_id, request)
            .await?
            .ok_or_else(|| ctx.not_found("memory endpoint"))
    }

    async fn load_memory(
        &self,
        user_id: &str,
        thread_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryItem>, GatewayError> {
        let ctx = memory_ctx("memory.load", user_id, thread_id).with("limit", limit);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let request = StoreRequest::new(Method::GET, &["memory"])
            .query("q", query)
            .query("limit", limit)
            .query("thread_id", thread_id);
        let items: Option<Option<Vec<MemoryItem>>> = self.client.send(&ctx, user_id, request).await?;
        let mut items = items.flatten().unwrap_or_default();
        items.retain(|item| item.thread_id == thread_id && item.user_id == user_id);
        self.order.rank(&mut items);
        items.truncate(limit);
        Ok(items)
    }

    async fn reset_memory(&self, user_id: &str, thread_id: &str) -> Result<(), GatewayError> {
        let ctx = memory_ctx("memory.reset", user_id, thread_id);
        let request = StoreRequest::new(Method::DELETE, &["memory"]).query("thread_id", thread_id);
        // Resetting an empty thread is not an error.
        let _: Option<serde::de::IgnoredAny> = self.client.send(&ctx, user_id, request).await?;
        tracing::info!(user_id, thread_id, "memory reset");
        Ok(())
    }

    async fn save_flow_state(
        &self,
        user_id: &str,
        thread_id: &str,
        flow_uuid: &str,
        method_name: &str,
        state: TypedBlob,
    ) -> Result<(), GatewayError> {
        let ctx = memory_ctx("flow.save_state", user_id, thread_id)
            .with("flow", flow_uuid)
            .with("method", method_name);
        let body = SaveFlowState {
            thread_id,
            flow_uuid,
            method_name,
            state: &state,
        };
        let request = StoreRequest::new(Method::POST, &["flows", "state"]).body(&ctx, &body)?;
        let stored: Option<serde::de::IgnoredAny> = self.client.send(&ctx, user_id, request).await?;
        if stored.is_none() {
            return Err(ctx.not_found("flow state endpoint"));
        }
        Ok(())
    }

    async fn load_flow_state(
        &self,
        user_id: &str,
        thread_id: &str,
        flow_uuid: &str,
    ) -> Result<Option<FlowState>, GatewayError> {
        let ctx = memory_ctx("flow.load_state", user_id, thread_id).with("flow", flow_uuid);
        let request = StoreRequest::new(Method::GET, &["flows", "state"])
            .query("thread_id", thread_id)
            .query("flow_uuid", flow_uuid);
        let state: Option<Option<FlowState>> = self.client.send(&ctx, user_id, request).await?;
        Ok(state.flatten())
    }
}
