//! HTTP client for the central state store.

use std::{env, fmt, time::Duration};

use a2a_gateway_core::GatewayError;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Header carrying the calling user's identity on every store request.
pub const USER_ID_HEADER: &str = "X-User-ID";

/// Default per-request timeout.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);

const STORE_URL_ENV: &str = "A2A_STORE_URL";
const STORE_TIMEOUT_ENV: &str = "A2A_STORE_TIMEOUT_SECS";

/// Connection settings for the central store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl StoreConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Read `A2A_STORE_URL` and the optional `A2A_STORE_TIMEOUT_SECS`.
    ///
    /// # Errors
    /// Returns `BadRequest` if the URL is unset or the timeout is not a number.
    pub fn from_env() -> Result<Self, GatewayError> {
        let base_url = env::var(STORE_URL_ENV)
            .map_err(|_| GatewayError::BadRequest(format!("{STORE_URL_ENV} is not set")))?;
        let mut config = Self::new(base_url);
        if let Ok(secs) = env::var(STORE_TIMEOUT_ENV) {
            let secs: u64 = secs.trim().parse().map_err(|e| {
                GatewayError::BadRequest(format!("{STORE_TIMEOUT_ENV} is not a number of seconds: {e}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Operation name plus scope keys, attached to every error.
///
/// Renders as `checkpoint.put(user=u, thread=t1, ns=)`.
#[derive(Debug, Clone)]
pub struct CallContext {
    operation: &'static str,
    keys: Vec<(&'static str, String)>,
}

impl CallContext {
    #[must_use]
    pub const fn new(operation: &'static str) -> Self {
        Self {
            operation,
            keys: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.keys.push((key, value.to_string()));
        self
    }

    fn unavailable(&self, detail: impl fmt::Display) -> GatewayError {
        GatewayError::StoreUnavailable {
            context: self.to_string(),
            detail: detail.to_string(),
        }
    }

    fn malformed(&self, detail: impl fmt::Display) -> GatewayError {
        GatewayError::Serialization {
            context: self.to_string(),
            detail: detail.to_string(),
        }
    }

    /// `NotFound` naming this call.
    #[must_use]
    pub fn not_found(&self, what: impl fmt::Display) -> GatewayError {
        GatewayError::NotFound(format!("{what} ({self})"))
    }

    fn bad_request(&self, detail: impl fmt::Display) -> GatewayError {
        GatewayError::BadRequest(format!("{self}: {detail}"))
    }
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.operation)?;
        for (i, (key, value)) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str(")")
    }
}

/// Response envelope used by every store endpoint.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: bool,
}

/// One store request, built up by the store adapters.
pub(crate) struct StoreRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub query: Vec<(&'static str, String)>,
    pub body: Option<Value>,
}

impl StoreRequest {
    pub fn new(method: Method, segments: &[&str]) -> Self {
        Self {
            method,
            segments: segments.iter().map(ToString::to_string).collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    pub fn body<B: Serialize>(mut self, ctx: &CallContext, body: &B) -> Result<Self, GatewayError> {
        self.body = Some(serde_json::to_value(body).map_err(|e| ctx.malformed(e))?);
        Ok(self)
    }
}

/// Stateless HTTP client for the central store.
///
/// Every call is one round trip scoped by the `X-User-ID` header. Nothing is
/// cached and nothing is retried; callers decide whether a
/// `StoreUnavailable` is worth another attempt.
#[derive(Debug, Clone)]
pub struct StoreClient {
    http: Client,
    base_url: Url,
}

impl StoreClient {
    /// Create a client for the store described by `config`.
    ///
    /// # Errors
    /// Returns `BadRequest` for an unusable base URL.
    pub fn new(config: &StoreConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::BadRequest(format!("Invalid store url {:?}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::BadRequest(format!(
                "Store url cannot be a base: {:?}",
                config.base_url
            )));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::BadRequest(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { http, base_url })
    }

    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url<S: AsRef<str>>(&self, segments: &[S]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send one request and decode the envelope's `data`.
    ///
    /// A `404` is `Ok(None)`; callers turn it into `NotFound` where absence
    /// is not an expected answer.
    pub(crate) async fn send<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        user_id: &str,
        request: StoreRequest,
    ) -> Result<Option<T>, GatewayError> {
        if user_id.trim().is_empty() {
            return Err(ctx.bad_request("missing user id"));
        }

        let url = self.url(&request.segments);
        tracing::debug!(%ctx, method = %request.method, %url, "store request");

        let mut builder = self
            .http
            .request(request.method, url)
            .header(USER_ID_HEADER, user_id);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(%ctx, "store request failed: {e}");
            ctx.unavailable(format!("request failed: {e}"))
        })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ctx.unavailable(format!("failed to read response body: {e}")))?;

        if status == StatusCode::NOT_FOUND {
            tracing::debug!(%ctx, "store answered not found");
            return Ok(None);
        }

        let envelope = if text.trim().is_empty() {
            None
        } else {
            serde_json::from_str::<Envelope>(&text).ok()
        };
        let message = envelope
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_else(|| text.clone());

        match status {
            StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                tracing::warn!(%ctx, %status, "store rejected request: {message}");
                return Err(ctx.bad_request(message));
            }
            s if !s.is_success() => {
                tracing::warn!(%ctx, %status, "store error: {message}");
                return Err(ctx.unavailable(format!("HTTP {status}: {message}")));
            }
            _ => {}
        }

        let Some(envelope) = envelope else {
            if text.trim().is_empty() {
                return serde_json::from_value(Value::Null)
                    .map(Some)
                    .map_err(|e| ctx.malformed(format!("empty response: {e}")));
            }
            return Err(ctx.malformed("response is not a store envelope"));
        };
        if envelope.error {
            tracing::warn!(%ctx, "store reported an error: {message}");
            return Err(ctx.unavailable(message));
        }

        serde_json::from_value(envelope.data.unwrap_or(Value::Null))
            .map(Some)
            .map_err(|e| ctx.malformed(e))
    }
}
