use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use murmur_core::agent::{AgentEventStream, AgentExecutor};
use murmur_core::errors::AgentError;
use murmur_core::messages::Message;

use crate::sse::SseEventStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for an agent runtime reachable over HTTP.
///
/// `POST {base}/stream_events` answers with Server-Sent Events named after
/// the agent event type; `POST {base}/invoke` answers with `{ "messages": [...] }`.
pub struct HttpAgent {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct RunRequest<'a> {
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct InvokeResponse {
    messages: Vec<Message>,
}

impl HttpAgent {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AgentError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AgentError::new(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        })
    }

    pub fn with_api_key(mut self, key: SecretString) -> Self {
        self.api_key = Some(key);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str, messages: &[Message]) -> RequestBuilder {
        let mut req = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .json(&RunRequest { messages });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, AgentError> {
        let resp = req
            .send()
            .await
            .map_err(|e| AgentError::new(format!("agent unreachable: {e}")))?;

        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(AgentError::with_status(error_message(status, &body), status))
    }
}

/// Pull a readable message out of an upstream error body.
fn error_message(status: u16, body: &str) -> String {
    #[derive(Deserialize)]
    struct Body {
        error: Option<String>,
        detail: Option<String>,
        message: Option<String>,
    }

    serde_json::from_str::<Body>(body)
        .ok()
        .and_then(|b| b.error.or(b.detail).or(b.message))
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| format!("agent responded with status {status}"))
}

#[async_trait]
impl AgentExecutor for HttpAgent {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip_all, fields(agent = %self.base_url, messages = messages.len()))]
    async fn stream_events(&self, messages: &[Message]) -> Result<AgentEventStream, AgentError> {
        let req = self
            .post("stream_events", messages)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let resp = self.send(req).await?;
        Ok(Box::pin(SseEventStream::new(resp.bytes_stream())))
    }

    #[instrument(skip_all, fields(agent = %self.base_url, messages = messages.len()))]
    async fn invoke(&self, messages: &[Message]) -> Result<Vec<Message>, AgentError> {
        let resp = self.send(self.post("invoke", messages)).await?;
        let body: InvokeResponse = resp
            .json()
            .await
            .map_err(|e| AgentError::new(format!("unreadable agent transcript: {e}")))?;
        Ok(body.messages)
    }
}
