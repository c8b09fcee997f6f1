//! In-process agent backend.

use std::{collections::HashMap, sync::Arc};

use a2a_gateway_core::{
    AgentClient, EventLog, EventStream, GatewayError, Operation,
    error::{INVALID_PARAMS, TASK_NOT_CANCELABLE, TASK_NOT_FOUND},
    protocol::{
        Artifact, Message, MessageSendParams, Part, Role, SendMessageResult, StreamEvent, TASK_KIND, Task,
        TaskArtifactUpdateEvent, TaskIdParams, TaskPushNotificationConfig, TaskQueryParams,
        TaskState, TaskStatus, TaskStatusUpdateEvent,
    },
};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

struct TaskEntry {
    task: Task,
    log: Arc<EventLog>,
}

/// In-memory agent backend.
///
/// Useful for development and tests. Tasks are keyed by the message's task
/// id, or by its message id when the message starts a new task. Every task
/// keeps a replayable event log, so resubscribing replays what happened so
/// far and then follows live events. Data is lost on restart.
pub struct InMemoryAgent {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    push_configs: RwLock<HashMap<String, TaskPushNotificationConfig>>,
    echo: bool,
}

impl Default for InMemoryAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAgent {
    /// Create a backend whose tasks stay working until driven by
    /// [`complete`](Self::complete) or [`publish`](Self::publish).
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            push_configs: RwLock::new(HashMap::new()),
            echo: false,
        }
    }

    /// Create a backend that answers every message by echoing its text and
    /// completing the task.
    #[must_use]
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::new()
        }
    }

    fn not_found(operation: Operation, task_id: &str) -> GatewayError {
        GatewayError::backend(operation, TASK_NOT_FOUND, format!("task not found: {task_id}"))
    }

    /// Record an inbound message, creating its task if needed.
    async fn accept(&self, operation: Operation, mut message: Message) -> Result<(Task, Arc<EventLog>), GatewayError> {
        let task_id = message
            .task_id
            .clone()
            .unwrap_or_else(|| message.message_id.clone());
        let mut tasks = self.tasks.write().await;

        if let Some(entry) = tasks.get_mut(&task_id) {
            if entry.task.status.state.is_terminal() {
                return Err(GatewayError::backend(
                    operation,
                    INVALID_PARAMS,
                    format!("task {task_id} is already {:?}", entry.task.status.state),
                ));
            }
            message.task_id = Some(task_id.clone());
            message.context_id = Some(entry.task.context_id.clone());
            entry.task.status = TaskStatus::new(TaskState::Working);
            entry.task.history.push(message);
            // A turn that ended in input-required or auth-required closed the
            // log; the next turn streams on a fresh one.
            if entry.log.is_closed() {
                let log = Arc::new(EventLog::new());
                log.push(StreamEvent::Task(entry.task.clone()));
                entry.log = log;
            }
            entry.log.push(StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
                is_final: false,
                ..TaskStatusUpdateEvent::final_state(
                    task_id.clone(),
                    entry.task.context_id.clone(),
                    TaskState::Working,
                )
            }));
        } else {
            let context_id = message
                .context_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            message.task_id = Some(task_id.clone());
            message.context_id = Some(context_id.clone());
            let task = Task {
                id: task_id.clone(),
                context_id,
                status: TaskStatus::new(TaskState::Working),
                history: vec![message],
                artifacts: Vec::new(),
                metadata: None,
                kind: TASK_KIND.to_string(),
            };
            let log = Arc::new(EventLog::new());
            log.push(StreamEvent::Task(task.clone()));
            tasks.insert(task_id.clone(), TaskEntry { task, log });
        }

        let Some(entry) = tasks.get_mut(&task_id) else {
            return Err(Self::not_found(operation, &task_id));
        };
        if self.echo {
            Self::echo_reply(entry);
        }
        Ok((entry.task.clone(), Arc::clone(&entry.log)))
    }

    fn echo_reply(entry: &mut TaskEntry) {
        let text = entry
            .task
            .history
            .last()
            .map(|m| {
                m.parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Text { text, .. } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        let artifact = Artifact {
            artifact_id: Uuid::new_v4().to_string(),
            name: Some("echo".into()),
            description: None,
            parts: vec![Part::text(text.clone())],
            metadata: None,
        };
        entry.task.artifacts.push(artifact.clone());
        entry.log.push(StreamEvent::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: entry.task.id.clone(),
            context_id: entry.task.context_id.clone(),
            artifact,
            append: None,
            last_chunk: Some(true),
            kind: "artifact-update".into(),
        }));
        Self::finish(entry, TaskState::Completed, Some(Message::new_text(Role::Agent, text)));
    }

    fn finish(entry: &mut TaskEntry, state: TaskState, reply: Option<Message>) {
        let mut status = TaskStatus::new(state);
        status.message = reply;
        entry.task.status = status.clone();
        entry.log.push(StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            status,
            ..TaskStatusUpdateEvent::final_state(
                entry.task.id.clone(),
                entry.task.context_id.clone(),
                state,
            )
        }));
    }

    /// Complete a task with an agent reply.
    ///
    /// # Errors
    /// Returns a task-not-found backend error for an unknown task.
    pub async fn complete(&self, task_id: &str, reply: Message) -> Result<Task, GatewayError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| Self::not_found(Operation::SendMessage, task_id))?;
        Self::finish(entry, TaskState::Completed, Some(reply));
        Ok(entry.task.clone())
    }

    /// Publish an arbitrary event on a task's stream.
    ///
    /// Status updates also move the task to the reported state.
    ///
    /// # Errors
    /// Returns a task-not-found backend error for an unknown task.
    pub async fn publish(&self, task_id: &str, event: StreamEvent) -> Result<(), GatewayError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| Self::not_found(Operation::StreamMessage, task_id))?;
        match &event {
            StreamEvent::StatusUpdate(update) => entry.task.status = update.status.clone(),
            StreamEvent::ArtifactUpdate(update) => entry.task.artifacts.push(update.artifact.clone()),
            StreamEvent::Task(_) | StreamEvent::Message(_) => {}
        }
        entry.log.push(event);
        Ok(())
    }

    /// Number of tasks held.
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }
}

#[async_trait]
impl AgentClient for InMemoryAgent {
    async fn send_message(&self, params: MessageSendParams) -> Result<SendMessageResult, GatewayError> {
        let (task, _) = self.accept(Operation::SendMessage, params.message).await?;
        Ok(SendMessageResult::Task(task))
    }

    async fn stream_message(&self, params: MessageSendParams) -> Result<EventStream, GatewayError> {
        let (_, log) = self.accept(Operation::StreamMessage, params.message).await?;
        Ok(log.history_plus_stream(Operation::StreamMessage))
    }

    async fn get_task(&self, params: TaskQueryParams) -> Result<Task, GatewayError> {
        let tasks = self.tasks.read().await;
        let mut task = tasks
            .get(&params.id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| Self::not_found(Operation::GetTask, &params.id))?;
        if let Some(limit) = params.history_length {
            let keep = usize::try_from(limit).unwrap_or(usize::MAX);
            let skip = task.history.len().saturating_sub(keep);
            task.history.drain(..skip);
        }
        Ok(task)
    }

    async fn cancel_task(&self, params: TaskIdParams) -> Result<Task, GatewayError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&params.id)
            .ok_or_else(|| Self::not_found(Operation::CancelTask, &params.id))?;
        if entry.task.status.state.is_terminal() {
            return Err(GatewayError::backend(
                Operation::CancelTask,
                TASK_NOT_CANCELABLE,
                format!("task {} is already {:?}", params.id, entry.task.status.state),
            ));
        }
        Self::finish(entry, TaskState::Canceled, None);
        Ok(entry.task.clone())
    }

    async fn set_push_notification(
        &self,
        config: TaskPushNotificationConfig,
    ) -> Result<TaskPushNotificationConfig, GatewayError> {
        if !self.tasks.read().await.contains_key(&config.task_id) {
            return Err(Self::not_found(Operation::SetPushNotification, &config.task_id));
        }
        self.push_configs
            .write()
            .await
            .insert(config.task_id.clone(), config.clone());
        Ok(config)
    }

    async fn get_push_notification(
        &self,
        params: TaskIdParams,
    ) -> Result<TaskPushNotificationConfig, GatewayError> {
        self.push_configs
            .read()
            .await
            .get(&params.id)
            .cloned()
            .ok_or_else(|| Self::not_found(Operation::GetPushNotification, &params.id))
    }

    async fn resubscribe(&self, params: TaskIdParams) -> Result<EventStream, GatewayError> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(&params.id)
            .ok_or_else(|| Self::not_found(Operation::Resubscribe, &params.id))?;
        Ok(entry.log.history_plus_stream(Operation::Resubscribe))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn hello() -> MessageSendParams {
        MessageSendParams::new(Message::new_text(Role::User, "hello"))
    }

    #[tokio::test]
    async fn test_send_creates_working_task() {
        let agent = InMemoryAgent::new();
        let params = hello();
        let message_id = params.message.message_id.clone();

        let SendMessageResult::Task(task) = agent.send_message(params).await.unwrap() else {
            panic!("expected a task");
        };
        assert_eq!(task.id, message_id);
        assert_eq!(task.status.state, TaskState::Working);
        assert_eq!(task.history[0].task_id.as_deref(), Some(message_id.as_str()));
        assert_eq!(agent.task_count().await, 1);
    }

    #[tokio::test]
    async fn test_echo_streams_to_completion() {
        let agent = InMemoryAgent::echo();
        let events: Vec<_> = agent.stream_message(hello()).await.unwrap().collect().await;
        assert_eq!(events.len(), 3);
        let events: Vec<StreamEvent> = events.into_iter().map(Result::unwrap).collect();
        assert!(matches!(events[0], StreamEvent::Task(_)));
        assert!(matches!(events[1], StreamEvent::ArtifactUpdate(_)));
        assert!(events[2].is_final());
    }

    #[tokio::test]
    async fn test_cancel_twice_is_not_cancelable() {
        let agent = InMemoryAgent::new();
        let SendMessageResult::Task(task) = agent.send_message(hello()).await.unwrap() else {
            panic!("expected a task");
        };
        let canceled = agent.cancel_task(TaskIdParams::new(&task.id)).await.unwrap();
        assert_eq!(canceled.status.state, TaskState::Canceled);

        let err = agent.cancel_task(TaskIdParams::new(&task.id)).await.unwrap_err();
        assert_eq!(err.rpc_code(), TASK_NOT_CANCELABLE);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let agent = InMemoryAgent::new();
        let err = agent.get_task(TaskQueryParams::new("missing")).await.unwrap_err();
        assert_eq!(err.rpc_code(), TASK_NOT_FOUND);
        assert!(agent.resubscribe(TaskIdParams::new("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_history_length_keeps_latest() {
        let agent = InMemoryAgent::new();
        let first = hello();
        let task_id = first.message.message_id.clone();
        agent.send_message(first).await.unwrap();

        let mut follow_up = hello();
        follow_up.message.task_id = Some(task_id.clone());
        let follow_up_id = follow_up.message.message_id.clone();
        agent.send_message(follow_up).await.unwrap();

        let mut query = TaskQueryParams::new(&task_id);
        query.history_length = Some(1);
        let task = agent.get_task(query).await.unwrap();
        assert_eq!(task.history.len(), 1);
        assert_eq!(task.history[0].message_id, follow_up_id);
    }

    #[tokio::test]
    async fn test_input_required_task_resumes_on_next_turn() {
        let agent = InMemoryAgent::new();
        let first = hello();
        let task_id = first.message.message_id.clone();
        let mut turn = agent.stream_message(first).await.unwrap();
        assert!(matches!(turn.next().await.unwrap().unwrap(), StreamEvent::Task(_)));

        agent
            .publish(
                &task_id,
                StreamEvent::StatusUpdate(TaskStatusUpdateEvent::final_state(
                    task_id.clone(),
                    "ctx",
                    TaskState::InputRequired,
                )),
            )
            .await
            .unwrap();
        let paused = turn.next().await.unwrap().unwrap();
        assert!(paused.is_final());
        assert!(turn.next().await.is_none());

        let mut follow_up = hello();
        follow_up.message.task_id = Some(task_id.clone());
        let mut turn = agent.stream_message(follow_up).await.unwrap();
        let StreamEvent::Task(snapshot) = turn.next().await.unwrap().unwrap() else {
            panic!("expected a task snapshot");
        };
        assert_eq!(snapshot.history.len(), 2);
        let StreamEvent::StatusUpdate(working) = turn.next().await.unwrap().unwrap() else {
            panic!("expected a status update");
        };
        assert_eq!(working.status.state, TaskState::Working);
        assert!(!working.is_final);

        agent
            .complete(&task_id, Message::new_text(Role::Agent, "done"))
            .await
            .unwrap();
        let last = turn.next().await.unwrap().unwrap();
        assert!(last.is_final());
        assert!(turn.next().await.is_none());

        let replay: Vec<StreamEvent> = agent
            .resubscribe(TaskIdParams::new(&task_id))
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;
        let StreamEvent::StatusUpdate(end) = replay.last().unwrap() else {
            panic!("expected a status update");
        };
        assert_eq!(end.status.state, TaskState::Completed);
    }
}
