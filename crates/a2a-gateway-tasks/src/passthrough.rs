//! Passthrough task manager: forwards every operation to one backend client.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use a2a_gateway_core::{
    AgentClient, AgentRef, EventStream, GatewayError, Operation, TaskManager,
    protocol::{
        MESSAGE_KIND, MessageSendParams, SendMessageResult, StreamEvent, Task, TaskIdParams,
        TaskPushNotificationConfig, TaskQueryParams, TaskState, TaskStatusUpdateEvent,
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::{sync::watch, time::Instant};
use uuid::Uuid;

/// Default execution timeout for `message/send` and `message/stream`.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Task manager configuration.
#[derive(Debug, Clone, Copy)]
pub struct TaskManagerConfig {
    /// Wall-clock bound on `message/send` and on a whole `message/stream`.
    pub execution_timeout: Duration,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }
}

/// Cancellation signals for tasks with open streams.
#[derive(Default)]
struct CancelSignals {
    tasks: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl CancelSignals {
    fn subscribe(self: &Arc<Self>, task_id: String) -> CancelGuard {
        let rx = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(task_id.clone())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe();
        CancelGuard {
            signals: Arc::clone(self),
            task_id,
            rx: Some(rx),
        }
    }

    /// Signal every open stream of `task_id`; returns how many were open.
    fn cancel(&self, task_id: &str) -> usize {
        let sender = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
        sender.map_or(0, |tx| {
            let open = tx.receiver_count();
            tx.send_replace(true);
            open
        })
    }

    fn release(&self, task_id: &str) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.get(task_id).is_some_and(|tx| tx.receiver_count() == 0) {
            tasks.remove(task_id);
        }
    }
}

/// Subscription of one open stream to its task's cancellation signal.
struct CancelGuard {
    signals: Arc<CancelSignals>,
    task_id: String,
    rx: Option<watch::Receiver<bool>>,
}

impl CancelGuard {
    async fn cancelled(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        drop(self.rx.take());
        self.signals.release(&self.task_id);
    }
}

async fn cancelled(guard: Option<&mut CancelGuard>) {
    match guard {
        Some(guard) => guard.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

enum Step {
    Cancelled,
    TimedOut,
    Next(Option<Result<StreamEvent, GatewayError>>),
}

/// Task manager that delegates every operation to a single backend.
///
/// Adds only normalization: synthesized message identifiers and kinds, a
/// per-call execution timeout, and propagation of cancellation to open
/// streams of the canceled task.
pub struct PassthroughTaskManager {
    agent: AgentRef,
    client: Arc<dyn AgentClient>,
    config: TaskManagerConfig,
    signals: Arc<CancelSignals>,
}

impl PassthroughTaskManager {
    /// Create a manager bound to `client`.
    #[must_use]
    pub fn new(agent: AgentRef, client: Arc<dyn AgentClient>, config: TaskManagerConfig) -> Self {
        Self {
            agent,
            client,
            config,
            signals: Arc::new(CancelSignals::default()),
        }
    }

    /// Agent this manager serves.
    #[must_use]
    pub const fn agent(&self) -> &AgentRef {
        &self.agent
    }

    fn tag(&self, operation: Operation, err: GatewayError) -> GatewayError {
        tracing::warn!(agent = %self.agent, %operation, kind = %err.kind(), "backend call failed: {err}");
        match err {
            GatewayError::BackendFailure { code, detail, .. } => GatewayError::BackendFailure {
                operation,
                code,
                detail,
            },
            other => other,
        }
    }

    async fn bounded<T>(
        &self,
        operation: Operation,
        deadline: Instant,
        call: impl Future<Output = Result<T, GatewayError>> + Send,
    ) -> Result<T, GatewayError> {
        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => result.map_err(|e| self.tag(operation, e)),
            Err(_) => {
                tracing::warn!(agent = %self.agent, %operation, "execution timeout exceeded");
                Err(GatewayError::Timeout {
                    operation,
                    after: self.config.execution_timeout,
                })
            }
        }
    }

    /// Relay a backend stream until a final event, cancellation, timeout,
    /// an error, or backend disconnect.
    fn relay(
        &self,
        operation: Operation,
        upstream: EventStream,
        task_id: Option<String>,
        deadline: Option<Instant>,
    ) -> EventStream {
        let signals = Arc::clone(&self.signals);
        let agent = self.agent.clone();
        let after = self.config.execution_timeout;
        let mut upstream = upstream;
        let mut guard = task_id.clone().map(|id| signals.subscribe(id));

        let events = async_stream::stream! {
            let mut task_id = task_id;
            let mut context_id = String::new();
            loop {
                let step = tokio::select! {
                    biased;
                    () = cancelled(guard.as_mut()) => Step::Cancelled,
                    () = deadline_reached(deadline) => Step::TimedOut,
                    next = upstream.next() => Step::Next(next),
                };
                match step {
                    Step::Cancelled => {
                        let id = task_id.clone().unwrap_or_default();
                        tracing::debug!(%agent, %operation, task_id = %id, "closing stream of canceled task");
                        yield Ok(StreamEvent::StatusUpdate(TaskStatusUpdateEvent::final_state(
                            id,
                            context_id.clone(),
                            TaskState::Canceled,
                        )));
                        break;
                    }
                    Step::TimedOut => {
                        tracing::warn!(%agent, %operation, "execution timeout exceeded mid-stream");
                        yield Err(GatewayError::Timeout { operation, after });
                        break;
                    }
                    Step::Next(None) => {
                        tracing::warn!(%agent, %operation, "backend closed stream before a final event");
                        yield Err(GatewayError::backend_transport(
                            operation,
                            "backend closed the stream before a final event",
                        ));
                        break;
                    }
                    Step::Next(Some(Err(err))) => {
                        tracing::warn!(%agent, %operation, kind = %err.kind(), "stream failed: {err}");
                        yield Err(match err {
                            GatewayError::BackendFailure { code, detail, .. } => {
                                GatewayError::BackendFailure { operation, code, detail }
                            }
                            other => other,
                        });
                        break;
                    }
                    Step::Next(Some(Ok(event))) => {
                        if let Some(id) = event.context_id().filter(|id| !id.is_empty()) {
                            id.clone_into(&mut context_id);
                        }
                        if guard.is_none() {
                            if let Some(id) = event.task_id() {
                                task_id = Some(id.to_string());
                                guard = Some(signals.subscribe(id.to_string()));
                            }
                        }
                        let last = event.is_final();
                        yield Ok(event);
                        if last {
                            break;
                        }
                    }
                }
            }
        };
        events.boxed()
    }
}

/// Fill in a missing message identifier and kind.
fn normalize(mut params: MessageSendParams) -> MessageSendParams {
    if params.message.message_id.trim().is_empty() {
        params.message.message_id = Uuid::new_v4().to_string();
    }
    if params.message.kind.trim().is_empty() {
        params.message.kind = MESSAGE_KIND.to_string();
    }
    params
}

#[async_trait]
impl TaskManager for PassthroughTaskManager {
    async fn on_send_message(&self, params: MessageSendParams) -> Result<SendMessageResult, GatewayError> {
        let params = normalize(params);
        tracing::debug!(agent = %self.agent, message_id = %params.message.message_id, "forwarding message/send");
        let deadline = Instant::now() + self.config.execution_timeout;
        self.bounded(Operation::SendMessage, deadline, self.client.send_message(params))
            .await
    }

    async fn on_stream_message(&self, params: MessageSendParams) -> Result<EventStream, GatewayError> {
        let params = normalize(params);
        tracing::debug!(agent = %self.agent, message_id = %params.message.message_id, "forwarding message/stream");
        let task_id = params.message.task_id.clone();
        let deadline = Instant::now() + self.config.execution_timeout;
        let upstream = self
            .bounded(Operation::StreamMessage, deadline, self.client.stream_message(params))
            .await?;
        Ok(self.relay(Operation::StreamMessage, upstream, task_id, Some(deadline)))
    }

    async fn on_get_task(&self, params: TaskQueryParams) -> Result<Task, GatewayError> {
        self.client
            .get_task(params)
            .await
            .map_err(|e| self.tag(Operation::GetTask, e))
    }

    async fn on_cancel_task(&self, params: TaskIdParams) -> Result<Task, GatewayError> {
        let task_id = params.id.clone();
        let task = self
            .client
            .cancel_task(params)
            .await
            .map_err(|e| self.tag(Operation::CancelTask, e))?;
        let closed = self.signals.cancel(&task_id);
        tracing::info!(agent = %self.agent, %task_id, open_streams = closed, "task canceled");
        Ok(task)
    }

    async fn on_set_push_notification(
        &self,
        config: TaskPushNotificationConfig,
    ) -> Result<TaskPushNotificationConfig, GatewayError> {
        self.client
            .set_push_notification(config)
            .await
            .map_err(|e| self.tag(Operation::SetPushNotification, e))
    }

    async fn on_get_push_notification(
        &self,
        params: TaskIdParams,
    ) -> Result<TaskPushNotificationConfig, GatewayError> {
        self.client
            .get_push_notification(params)
            .await
            .map_err(|e| self.tag(Operation::GetPushNotification, e))
    }

    async fn on_resubscribe(&self, params: TaskIdParams) -> Result<EventStream, GatewayError> {
        let task_id = params.id.clone();
        let upstream = self
            .client
            .resubscribe(params)
            .await
            .map_err(|e| self.tag(Operation::Resubscribe, e))?;
        Ok(self.relay(Operation::Resubscribe, upstream, Some(task_id), None))
    }
}
