use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, instrument, warn, Span};

use murmur_core::agent::SourceProvider;
use murmur_core::messages::Message;
use murmur_core::side_channel;
use murmur_core::sources::{reverse_index, Source};
use murmur_core::transcript::agent_input;
use murmur_core::wire::ChatRequest;

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::transformer;

pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// `POST /api/chat`: stream the answer as plain text, or return the whole
/// transcript with its steps when `show_intermediate_steps` is set.
/// A body that is not a chat request gets `{ "error": message }` too.
#[instrument(
    name = "chat",
    skip_all,
    fields(steps = tracing::field::Empty, messages = tracing::field::Empty)
)]
pub async fn chat(
    State(state): State<AppState>,
    req: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = req?;
    let span = Span::current();
    span.record("steps", req.show_intermediate_steps);
    span.record("messages", req.messages.len());

    let input = agent_input(&req.messages);
    if req.show_intermediate_steps {
        let full = transformer::run_full(state.agent.as_ref(), &input).await?;
        return Ok(Json(full).into_response());
    }

    let text = transformer::run_stream(state.agent.as_ref(), &input).await?;
    let sources = fetch_sources(state.sources.as_ref(), &input).await;

    // The reply will be the last message of the transcript.
    let request_len = req.messages.len();
    let index = reverse_index(request_len + 1, request_len).unwrap_or_default();

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache");
    if let Some(channel) = side_channel::encode(index, &sources) {
        debug!(index, sources = sources.len(), "attaching sources");
        for (name, value) in channel.headers() {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(Body::from_stream(text))
        .map_err(|e| ApiError::internal(format!("failed to build response: {e}")))
}

/// A failing provider means "no sources"; the answer still streams.
async fn fetch_sources(provider: &dyn SourceProvider, messages: &[Message]) -> Vec<Source> {
    match provider.sources_for(messages).await {
        Ok(sources) => sources,
        Err(e) => {
            warn!(error = %e, error_kind = e.error_kind(), "source lookup failed, answering without sources");
            Vec::new()
        }
    }
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}
