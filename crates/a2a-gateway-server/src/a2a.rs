//! Per-agent A2A protocol server: JSON-RPC dispatch, SSE streaming and the
//! agent card.

use std::{convert::Infallible, sync::Arc};

use a2a_gateway_core::{
    EventStream, GatewayError, Operation, TaskManager,
    error::{METHOD_NOT_FOUND, PARSE_ERROR},
    protocol::{AgentCard, JSONRPC_VERSION, JsonRpcError, JsonRpcRequest, JsonRpcResponse},
};
use axum::{
    Json,
    body::Body,
    http::{HeaderMap, HeaderValue, Method, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ApiError;

const AGENT_CARD_PATHS: [&str; 2] = [".well-known/agent.json", ".well-known/agent-card.json"];

/// Protocol server of one registered agent.
pub struct A2aServer {
    card: AgentCard,
    manager: Arc<dyn TaskManager>,
    stream_buffer: usize,
}

impl A2aServer {
    #[must_use]
    pub fn new(card: AgentCard, manager: Arc<dyn TaskManager>, stream_buffer: usize) -> Self {
        Self {
            card,
            manager,
            stream_buffer: stream_buffer.max(1),
        }
    }

    #[must_use]
    pub const fn card(&self) -> &AgentCard {
        &self.card
    }

    /// Handle a request addressed to this agent; `rest` is the path below
    /// the agent's root.
    pub async fn handle(&self, method: &Method, rest: &str, body: &[u8]) -> Response {
        let rest = rest.trim_matches('/');
        if method == Method::POST && rest.is_empty() {
            self.handle_rpc(body).await
        } else if method == Method::GET && AGENT_CARD_PATHS.contains(&rest) {
            Json(&self.card).into_response()
        } else {
            ApiError(GatewayError::NotFound(format!("no {method} endpoint at /{rest}"))).into_response()
        }
    }

    /// Answer one JSON-RPC request body.
    pub async fn handle_rpc(&self, body: &[u8]) -> Response {
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                return rpc_error(Value::Null, JsonRpcError::new(PARSE_ERROR, format!("Parse error: {e}")));
            }
        };
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => return rpc_error(id, JsonRpcError::invalid_request(format!("Invalid request: {e}"))),
        };
        if request.jsonrpc != JSONRPC_VERSION {
            return rpc_error(
                request.id,
                JsonRpcError::invalid_request(format!("Unsupported jsonrpc version {:?}", request.jsonrpc)),
            );
        }
        let Some(operation) = Operation::from_method(&request.method) else {
            tracing::debug!(agent = %self.card.name, method = %request.method, "unknown method");
            return rpc_error(
                request.id,
                JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {}", request.method)),
            );
        };

        if operation.is_streaming() {
            match self.open_stream(operation, &request).await {
                Ok(events) => self.sse(request.id, events),
                Err(e) => rpc_error(request.id, JsonRpcError::from(&e)),
            }
        } else {
            match self.call(operation, &request).await {
                Ok(result) => Json(JsonRpcResponse::success(request.id, result)).into_response(),
                Err(e) => rpc_error(request.id, JsonRpcError::from(&e)),
            }
        }
    }

    async fn call(&self, operation: Operation, request: &JsonRpcRequest) -> Result<Value, GatewayError> {
        match operation {
            Operation::SendMessage => to_result(operation, self.manager.on_send_message(request.parse_params()?).await?),
            Operation::GetTask => to_result(operation, self.manager.on_get_task(request.parse_params()?).await?),
            Operation::CancelTask => to_result(operation, self.manager.on_cancel_task(request.parse_params()?).await?),
            Operation::SetPushNotification => to_result(
                operation,
                self.manager.on_set_push_notification(request.parse_params()?).await?,
            ),
            Operation::GetPushNotification => to_result(
                operation,
                self.manager.on_get_push_notification(request.parse_params()?).await?,
            ),
            Operation::StreamMessage | Operation::Resubscribe => Err(GatewayError::BadRequest(format!(
                "{operation} answers with an event stream"
            ))),
        }
    }

    async fn open_stream(&self, operation: Operation, request: &JsonRpcRequest) -> Result<EventStream, GatewayError> {
        match operation {
            Operation::StreamMessage => self.manager.on_stream_message(request.parse_params()?).await,
            Operation::Resubscribe => self.manager.on_resubscribe(request.parse_params()?).await,
            other => Err(GatewayError::BadRequest(format!("{other} does not stream"))),
        }
    }

    /// Relay `events` as SSE frames through a bounded channel.
    ///
    /// A full channel pauses reading from the backend. When the client goes
    /// away the relay task drops the event stream at once.
    fn sse(&self, id: Value, mut events: EventStream) -> Response {
        let (tx, mut rx) = mpsc::channel::<Bytes>(self.stream_buffer);
        let agent = self.card.name.clone();

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    () = tx.closed() => {
                        tracing::debug!(%agent, "client disconnected; dropping stream");
                        break;
                    }
                    item = events.next() => item,
                };
                let Some(item) = item else { break };
                let (response, last) = match item {
                    Ok(event) => {
                        let last = event.is_final();
                        match serde_json::to_value(&event) {
                            Ok(result) => (JsonRpcResponse::success(id.clone(), result), last),
                            Err(e) => {
                                let err = GatewayError::Serialization {
                                    context: "sse.encode".into(),
                                    detail: e.to_string(),
                                };
                                (JsonRpcResponse::failure(id.clone(), JsonRpcError::from(&err)), true)
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(%agent, kind = %e.kind(), "stream ended with error: {e}");
                        (JsonRpcResponse::failure(id.clone(), JsonRpcError::from(&e)), true)
                    }
                };
                let Some(frame) = sse_frame(&response) else { break };
                if tx.send(frame).await.is_err() {
                    tracing::debug!(%agent, "client disconnected; dropping stream");
                    break;
                }
                if last {
                    break;
                }
            }
        });

        let body = async_stream::stream! {
            loop {
                let Some(chunk) = rx.recv().await else { break };
                yield Ok::<_, Infallible>(chunk);
            }
        };
        sse_response(body)
    }
}

fn to_result<T: Serialize>(operation: Operation, value: T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::Serialization {
        context: operation.method().to_string(),
        detail: e.to_string(),
    })
}

fn rpc_error(id: Value, error: JsonRpcError) -> Response {
    Json(JsonRpcResponse::failure(id, error)).into_response()
}

fn sse_frame(response: &JsonRpcResponse) -> Option<Bytes> {
    match serde_json::to_string(response) {
        Ok(json) => Some(Bytes::from(format!("data: {json}\n\n"))),
        Err(e) => {
            tracing::error!("Failed to serialize SSE frame: {e}");
            None
        }
    }
}

fn sse_response<S>(stream: S) -> Response
where
    S: futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}
