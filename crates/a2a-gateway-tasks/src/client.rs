//! A2A JSON-RPC client for agent backends reachable over HTTP.

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use a2a_gateway_core::{
    AgentClient, EventStream, GatewayError, Operation,
    protocol::{
        JsonRpcRequest, JsonRpcResponse, MessageSendParams, SendMessageResult, StreamEvent, Task,
        TaskIdParams, TaskPushNotificationConfig, TaskQueryParams,
    },
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header};
use serde::{Serialize, de::DeserializeOwned};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_STREAM: &str = "text/event-stream";

/// Backend client speaking A2A JSON-RPC over HTTP.
///
/// Holds no per-task state; every call is one HTTP round trip (or one
/// long-lived response body for streaming methods). Execution timeouts are
/// the task manager's concern, so the HTTP client only bounds connecting.
pub struct HttpAgentClient {
    http: Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpAgentClient {
    /// Create a client for the backend at `url`.
    ///
    /// # Errors
    /// Returns `BadRequest` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, GatewayError> {
        Self::with_headers(url, &HashMap::new())
    }

    /// Create a client that sends `headers` with every call.
    ///
    /// # Errors
    /// Returns `BadRequest` for an invalid header name or value.
    pub fn with_headers(
        url: impl Into<String>,
        headers: &HashMap<String, String>,
    ) -> Result<Self, GatewayError> {
        let mut header_map = header::HeaderMap::new();
        header_map.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        for (key, value) in headers {
            let name = header::HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| GatewayError::BadRequest(format!("Invalid header name {key:?}: {e}")))?;
            let val = header::HeaderValue::from_str(value)
                .map_err(|e| GatewayError::BadRequest(format!("Invalid value for header {key:?}: {e}")))?;
            header_map.insert(name, val);
        }

        let http = Client::builder()
            .default_headers(header_map)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::BadRequest(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Backend URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn post<P: Serialize + Sync>(
        &self,
        operation: Operation,
        params: &P,
        accept: &'static str,
    ) -> Result<reqwest::Response, GatewayError> {
        let params = serde_json::to_value(params)
            .map_err(|e| GatewayError::BadRequest(format!("Failed to serialize {operation} params: {e}")))?;
        let request = JsonRpcRequest::new(self.next_id(), operation.method(), params);

        let response = self
            .http
            .post(&self.url)
            .header(header::ACCEPT, accept)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_failure(operation, "HTTP request failed", &e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(%operation, %status, body = %text, "backend answered with an HTTP error");
            return Err(GatewayError::backend_transport(
                operation,
                format!("backend request failed: HTTP {}", status.as_u16()),
            ));
        }
        Ok(response)
    }

    async fn call<P, R>(&self, operation: Operation, params: &P) -> Result<R, GatewayError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let response = self.post(operation, params, "application/json").await?;
        let text = response
            .text()
            .await
            .map_err(|e| transport_failure(operation, "Failed to read response body", &e))?;
        let rpc: JsonRpcResponse =
            serde_json::from_str(&text).map_err(|e| transport_failure(operation, "Failed to parse response", &e))?;
        decode_result(operation, rpc)
    }

    async fn open_stream<P: Serialize + Sync>(
        &self,
        operation: Operation,
        params: &P,
    ) -> Result<EventStream, GatewayError> {
        let response = self.post(operation, params, EVENT_STREAM).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.contains(EVENT_STREAM) {
            // A backend that rejects the call answers with a plain JSON-RPC error.
            let text = response.text().await.unwrap_or_default();
            let rpc: JsonRpcResponse = serde_json::from_str(&text)
                .map_err(|e| transport_failure(operation, "Expected an event stream", &e))?;
            let event: StreamEvent = decode_result(operation, rpc)?;
            return Ok(futures::stream::iter([Ok(event)]).boxed());
        }

        let mut frames = response.bytes_stream().eventsource();
        let stream = async_stream::stream! {
            loop {
                let Some(frame) = frames.next().await else { break };
                let event = match frame {
                    Ok(frame) => decode_frame(operation, &frame.data),
                    Err(e) => Err(transport_failure(operation, "Stream read failed", &e)),
                };
                let failed = event.is_err();
                yield event;
                if failed {
                    break;
                }
            }
        };
        Ok(stream.boxed())
    }
}

/// Log the underlying failure and return a `BackendFailure` that does not
/// expose backend URLs or bodies to protocol clients.
fn transport_failure(operation: Operation, what: &str, err: &dyn fmt::Display) -> GatewayError {
    tracing::warn!(%operation, "{what}: {err}");
    GatewayError::backend_transport(operation, "backend request failed")
}

fn decode_result<R: DeserializeOwned>(operation: Operation, rpc: JsonRpcResponse) -> Result<R, GatewayError> {
    if let Some(error) = rpc.error {
        return Err(GatewayError::backend(operation, error.code, error.message));
    }
    let Some(result) = rpc.result else {
        return Err(transport_failure(operation, "Invalid response", &"neither result nor error"));
    };
    serde_json::from_value(result).map_err(|e| transport_failure(operation, "Unexpected result shape", &e))
}

fn decode_frame(operation: Operation, data: &str) -> Result<StreamEvent, GatewayError> {
    let rpc: JsonRpcResponse =
        serde_json::from_str(data).map_err(|e| transport_failure(operation, "Malformed stream frame", &e))?;
    decode_result(operation, rpc)
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn send_message(&self, params: MessageSendParams) -> Result<SendMessageResult, GatewayError> {
        self.call(Operation::SendMessage, &params).await
    }

    async fn stream_message(&self, params: MessageSendParams) -> Result<EventStream, GatewayError> {
        self.open_stream(Operation::StreamMessage, &params).await
    }

    async fn get_task(&self, params: TaskQueryParams) -> Result<Task, GatewayError> {
        self.call(Operation::GetTask, &params).await
    }

    async fn cancel_task(&self, params: TaskIdParams) -> Result<Task, GatewayError> {
        self.call(Operation::CancelTask, &params).await
    }

    async fn set_push_notification(
        &self,
        config: TaskPushNotificationConfig,
    ) -> Result<TaskPushNotificationConfig, GatewayError> {
        self.call(Operation::SetPushNotification, &config).await
    }

    async fn get_push_notification(
        &self,
        params: TaskIdParams,
    ) -> Result<TaskPushNotificationConfig, GatewayError> {
        self.call(Operation::GetPushNotification, &params).await
    }

    async fn resubscribe(&self, params: TaskIdParams) -> Result<EventStream, GatewayError> {
        self.open_stream(Operation::Resubscribe, &params).await
    }
}
