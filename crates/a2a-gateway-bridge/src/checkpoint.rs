//! Checkpoint DAG store for graph-structured execution.
//!
//! Checkpoints are immutable nodes keyed by (user, thread, namespace, id).
//! A node's optional parent must already exist in the same scope; the
//! store enforces this and answers `404` when it does not. Identifiers are
//! UUID v7, so insertion order and identifier order agree within a scope.
//!
//! Writing a checkpoint is idempotent per identifier: the store answers a
//! repeated put of the same node with the stored record. A caller that
//! retries allocates the identifier once with [`new_checkpoint_id`] and
//! passes it to every attempt of [`CheckpointStore::put_as`].

use a2a_gateway_core::GatewayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    blob::TypedBlob,
    client::{CallContext, StoreClient, StoreRequest},
};

/// Allocate a checkpoint identifier.
#[must_use]
pub fn new_checkpoint_id() -> String {
    Uuid::now_v7().to_string()
}

/// Scope every checkpoint call operates in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadScope {
    pub user_id: String,
    pub thread_id: String,
    /// Sub-graph namespace; empty for the root graph.
    pub checkpoint_ns: String,
}

impl ThreadScope {
    #[must_use]
    pub fn new(user_id: impl Into<String>, thread_id: impl Into<String>, checkpoint_ns: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: thread_id.into(),
            checkpoint_ns: checkpoint_ns.into(),
        }
    }

    fn context(&self, operation: &'static str) -> CallContext {
        CallContext::new(operation)
            .with("user", &self.user_id)
            .with("thread", &self.thread_id)
            .with("ns", &self.checkpoint_ns)
    }
}

/// A stored checkpoint node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub thread_id: String,
    pub checkpoint_ns: String,
    pub checkpoint_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_checkpoint_id: Option<String>,
    pub checkpoint: TypedBlob,
    #[serde(default)]
    pub metadata: Value,
    /// Store-assigned, increasing per scope.
    #[serde(default)]
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A write staged against a checkpoint before it is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub task_id: String,
    pub idx: u32,
    pub channel: String,
    pub value: TypedBlob,
}

/// Channel write as handed in by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelWrite {
    pub channel: String,
    pub value: TypedBlob,
}

impl ChannelWrite {
    #[must_use]
    pub fn new(channel: impl Into<String>, value: TypedBlob) -> Self {
        Self {
            channel: channel.into(),
            value,
        }
    }
}

/// A checkpoint bundled with the writes staged for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointTuple {
    pub checkpoint: CheckpointRecord,
    #[serde(default)]
    pub pending_writes: Vec<PendingWrite>,
}

#[derive(Serialize)]
struct PutWrites<'a> {
    thread_id: &'a str,
    checkpoint_ns: &'a str,
    checkpoint_id: &'a str,
    writes: Vec<PendingWrite>,
}

/// Checkpoint persistence for backends with a branching state model.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Write a new checkpoint under a fresh identifier and return it.
    ///
    /// With `parent` set the node extends that checkpoint, otherwise it is a
    /// root. An unknown parent is `NotFound`.
    async fn put(
        &self,
        scope: &ThreadScope,
        checkpoint: TypedBlob,
        metadata: Value,
        parent: Option<&str>,
    ) -> Result<String, GatewayError> {
        let checkpoint_id = new_checkpoint_id();
        self.put_as(scope, &checkpoint_id, checkpoint, metadata, parent).await?;
        Ok(checkpoint_id)
    }

    /// Write a checkpoint under a caller-chosen identifier.
    ///
    /// Repeating the call with the same node succeeds without writing a
    /// second one. Reusing the identifier for a different node is
    /// `BadRequest`.
    async fn put_as(
        &self,
        scope: &ThreadScope,
        checkpoint_id: &str,
        checkpoint: TypedBlob,
        metadata: Value,
        parent: Option<&str>,
    ) -> Result<(), GatewayError>;

    /// The checkpoint with `checkpoint_id`, or the latest one when `None`.
    async fn get(&self, scope: &ThreadScope, checkpoint_id: Option<&str>) -> Result<Option<CheckpointRecord>, GatewayError>;

    /// Like [`get`](Self::get), bundled with the checkpoint's pending writes.
    async fn get_tuple(
        &self,
        scope: &ThreadScope,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<CheckpointTuple>, GatewayError>;

    /// Checkpoints of the scope, most recent first.
    async fn list(&self, scope: &ThreadScope, limit: Option<usize>) -> Result<Vec<CheckpointTuple>, GatewayError>;

    /// Stage writes of one task against a checkpoint.
    ///
    /// Writes are keyed by (checkpoint, task, index), so repeating the call
    /// is harmless.
    async fn put_writes(
        &self,
        scope: &ThreadScope,
        checkpoint_id: &str,
        task_id: &str,
        writes: Vec<ChannelWrite>,
    ) -> Result<(), GatewayError>;
}

/// [`CheckpointStore`] backed by the central store.
#[derive(Debug, Clone)]
pub struct RemoteCheckpointStore {
    client: StoreClient,
}

impl RemoteCheckpointStore {
    #[must_use]
    pub const fn new(client: StoreClient) -> Self {
        Self { client }
    }

    async fn fetch(
        &self,
        ctx: &CallContext,
        scope: &ThreadScope,
        checkpoint_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple>, GatewayError> {
        let mut request = StoreRequest::new(Method::GET, &["checkpoints"])
            .query("thread_id", &scope.thread_id)
            .query("checkpoint_ns", &scope.checkpoint_ns);
        if let Some(id) = checkpoint_id {
            request = request.query("checkpoint_id", id);
        }
        if let Some(limit) = limit {
            request = request.query("limit", limit);
        }
        let tuples: Option<Option<Vec<CheckpointTuple>>> = self.client.send(ctx, &scope.user_id, request).await?;
        let mut tuples = tuples.flatten().unwrap_or_default();
        // Never hand out a node from another scope.
        tuples.retain(|t| {
            t.checkpoint.thread_id == scope.thread_id && t.checkpoint.checkpoint_ns == scope.checkpoint_ns
        });
        if let Some(limit) = limit {
            tuples.truncate(limit);
        }
        Ok(tuples)
    }
}

#[async_trait]
impl CheckpointStore for RemoteCheckpointStore {
    async fn put_as(
        &self,
        scope: &ThreadScope,
        checkpoint_id: &str,
        checkpoint: TypedBlob,
        metadata: Value,
        parent: Option<&str>,
    ) -> Result<(), GatewayError> {
        let ctx = scope.context("checkpoint.put");
        let record = CheckpointRecord {
            thread_id: scope.thread_id.clone(),
            checkpoint_ns: scope.checkpoint_ns.clone(),
            checkpoint_id: checkpoint_id.to_string(),
            parent_checkpoint_id: parent.map(str::to_string),
            checkpoint,
            metadata,
            version: 0,
            created_at: None,
        };
        let request = StoreRequest::new(Method::POST, &["checkpoints"]).body(&ctx, &record)?;
        let stored: Option<serde::de::IgnoredAny> = self.client.send(&ctx, &scope.user_id, request).await?;
        if stored.is_none() {
            let parent = parent.unwrap_or_default();
            tracing::warn!(%ctx, parent, "parent checkpoint not found");
            return Err(ctx.not_found(format!("parent checkpoint {parent}")));
        }
        tracing::debug!(%ctx, checkpoint_id, "checkpoint written");
        Ok(())
    }

    async fn get(&self, scope: &ThreadScope, checkpoint_id: Option<&str>) -> Result<Option<CheckpointRecord>, GatewayError> {
        Ok(self.get_tuple(scope, checkpoint_id).await?.map(|t| t.checkpoint))
    }

    async fn get_tuple(
        &self,
        scope: &ThreadScope,
        checkpoint_id: Option<&str>,
    ) -> Result<Option<CheckpointTuple>, GatewayError> {
        let ctx = scope
            .context("checkpoint.get_tuple")
            .with("checkpoint", checkpoint_id.unwrap_or("latest"));
        let tuples = self.fetch(&ctx, scope, checkpoint_id, Some(1)).await?;
        Ok(tuples
            .into_iter()
            .find(|t| checkpoint_id.is_none_or(|id| t.checkpoint.checkpoint_id == id)))
    }

    async fn list(&self, scope: &ThreadScope, limit: Option<usize>) -> Result<Vec<CheckpointTuple>, GatewayError> {
        let ctx = scope.context("checkpoint.list");
        self.fetch(&ctx, scope, None, limit).await
    }

    async fn put_writes(
        &self,
        scope: &ThreadScope,
        checkpoint_id: &str,
        task_id: &str,
        writes: Vec<ChannelWrite>,
    ) -> Result<(), GatewayError> {
        let ctx = scope
            .context("checkpoint.put_writes")
            .with("checkpoint", checkpoint_id)
            .with("task", task_id);
        let body = PutWrites {
            thread_id: &scope.thread_id,
            checkpoint_ns: &scope.checkpoint_ns,
            checkpoint_id,
            writes: writes
                .into_iter()
                .zip(0u32..)
                .map(|(write, idx)| PendingWrite {
                    task_id: task_id.to_string(),
                    idx,
                    channel: write.channel,
                    value: write.value,
                })
                .collect(),
        };
        let request = StoreRequest::new(Method::POST, &["checkpoint_writes"]).body(&ctx, &body)?;
        let stored: Option<serde::de::IgnoredAny> = self.client.send(&ctx, &scope.user_id, request).await?;
        if stored.is_none() {
            return Err(ctx.not_found(format!("checkpoint {checkpoint_id}")));
        }
        Ok(())
    }
}
