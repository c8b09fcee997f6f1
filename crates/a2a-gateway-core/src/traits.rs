//! Contracts between the router, task managers and agent backends.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    GatewayError,
    protocol::{
        MessageSendParams, SendMessageResult, StreamEvent, Task, TaskIdParams,
        TaskPushNotificationConfig, TaskQueryParams,
    },
};

/// Stream of protocol events; ends after a final event or an error.
pub type EventStream = BoxStream<'static, Result<StreamEvent, GatewayError>>;

/// Client for one agent backend.
///
/// Implementations talk to the backend however they like (HTTP JSON-RPC,
/// in-process); the gateway only relies on these operations.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Deliver a message and wait for the agent's answer.
    async fn send_message(&self, params: MessageSendParams) -> Result<SendMessageResult, GatewayError>;

    /// Deliver a message and follow the resulting events.
    async fn stream_message(&self, params: MessageSendParams) -> Result<EventStream, GatewayError>;

    /// Look up a task.
    async fn get_task(&self, params: TaskQueryParams) -> Result<Task, GatewayError>;

    /// Request cancellation of a task.
    async fn cancel_task(&self, params: TaskIdParams) -> Result<Task, GatewayError>;

    /// Store a push-notification config for a task.
    async fn set_push_notification(
        &self,
        config: TaskPushNotificationConfig,
    ) -> Result<TaskPushNotificationConfig, GatewayError>;

    /// Read back a task's push-notification config.
    async fn get_push_notification(
        &self,
        params: TaskIdParams,
    ) -> Result<TaskPushNotificationConfig, GatewayError>;

    /// Follow the events of an already running task.
    async fn resubscribe(&self, params: TaskIdParams) -> Result<EventStream, GatewayError>;
}

/// Task-management contract a protocol server dispatches to.
///
/// Mirrors [`AgentClient`] operation for operation; the difference is
/// ownership of protocol invariants (identifier synthesis, execution
/// timeouts, cancellation of open streams), which live here.
#[async_trait]
pub trait TaskManager: Send + Sync {
    async fn on_send_message(&self, params: MessageSendParams) -> Result<SendMessageResult, GatewayError>;

    async fn on_stream_message(&self, params: MessageSendParams) -> Result<EventStream, GatewayError>;

    async fn on_get_task(&self, params: TaskQueryParams) -> Result<Task, GatewayError>;

    async fn on_cancel_task(&self, params: TaskIdParams) -> Result<Task, GatewayError>;

    async fn on_set_push_notification(
        &self,
        config: TaskPushNotificationConfig,
    ) -> Result<TaskPushNotificationConfig, GatewayError>;

    async fn on_get_push_notification(
        &self,
        params: TaskIdParams,
    ) -> Result<TaskPushNotificationConfig, GatewayError>;

    async fn on_resubscribe(&self, params: TaskIdParams) -> Result<EventStream, GatewayError>;
}
