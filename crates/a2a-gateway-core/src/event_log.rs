//! Broadcast + history event log for task resubscription.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::{
    GatewayError,
    error::Operation,
    protocol::StreamEvent,
    traits::EventStream,
};

/// Default number of events kept for replay.
const HISTORY_EVENTS: usize = 1024;
/// Live buffer per subscriber before it counts as lagging.
const LIVE_BUFFER: usize = 256;

struct Inner {
    history: VecDeque<StreamEvent>,
    closed: bool,
}

/// Event log of one task.
///
/// New subscribers receive the retained history, then follow live events.
/// History snapshot and live subscription are taken under the same lock as
/// `push`, so a subscriber sees every event exactly once and in order.
pub struct EventLog {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<StreamEvent>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a log with the default history size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_EVENTS)
    }

    /// Create a log that retains at most `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(capacity.min(32)),
                closed: false,
            }),
            sender,
            capacity: capacity.max(1),
        }
    }

    /// Append an event and fan it out to live subscribers.
    ///
    /// Events pushed after a final event are dropped.
    pub fn push(&self, event: StreamEvent) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            tracing::debug!(task_id = ?event.task_id(), "dropping event pushed after final event");
            return;
        }
        inner.closed = event.is_final();
        let _ = self.sender.send(event.clone());
        if inner.history.len() == self.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(event);
    }

    /// Whether a final event has been pushed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).closed
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn history(&self) -> Vec<StreamEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live events, ending after the
    /// final event.
    ///
    /// A subscriber that falls more than the live buffer behind gets an error
    /// instead of a silently gapped stream.
    #[must_use]
    pub fn history_plus_stream(&self, operation: Operation) -> EventStream {
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let rx = (!inner.closed).then(|| self.sender.subscribe());
            (inner.history.iter().cloned().collect::<Vec<_>>(), rx)
        };

        let hist = futures::stream::iter(history.into_iter().map(Ok::<_, GatewayError>));
        let live = futures::stream::iter(rx)
            .flat_map(BroadcastStream::new)
            .map(move |res| {
                res.map_err(|err: BroadcastStreamRecvError| {
                    GatewayError::backend_transport(operation, format!("event subscriber fell behind: {err}"))
                })
            });

        let mut done = false;
        hist.chain(live)
            .take_while(move |res| {
                let keep = !done;
                done = done || res.as_ref().map_or(true, StreamEvent::is_final);
                future::ready(keep)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::protocol::{TaskState, TaskStatus, TaskStatusUpdateEvent};

    fn working(task_id: &str) -> StreamEvent {
        StreamEvent::StatusUpdate(TaskStatusUpdateEvent {
            status: TaskStatus::new(TaskState::Working),
            is_final: false,
            ..TaskStatusUpdateEvent::final_state(task_id, "ctx", TaskState::Working)
        })
    }

    fn done(task_id: &str) -> StreamEvent {
        StreamEvent::StatusUpdate(TaskStatusUpdateEvent::final_state(task_id, "ctx", TaskState::Completed))
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let log = std::sync::Arc::new(EventLog::new());
        log.push(working("t1"));

        let mut stream = log.history_plus_stream(Operation::Resubscribe);
        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_final());

        log.push(working("t1"));
        log.push(done("t1"));

        let second = stream.next().await.unwrap().unwrap();
        assert!(!second.is_final());
        let third = stream.next().await.unwrap().unwrap();
        assert!(third.is_final());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_log_replays_and_ends() {
        let log = EventLog::new();
        log.push(working("t1"));
        log.push(done("t1"));
        log.push(working("t1"));
        assert!(log.is_closed());
        assert_eq!(log.history().len(), 2);

        let events: Vec<_> = log.history_plus_stream(Operation::Resubscribe).collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].as_ref().unwrap().is_final());
    }

    #[test]
    fn test_history_is_bounded() {
        let log = EventLog::with_capacity(2);
        for _ in 0..5 {
            log.push(working("t1"));
        }
        assert_eq!(log.history().len(), 2);
    }
}
