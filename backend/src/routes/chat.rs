use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header::{self, HeaderName},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::GatewayError;
use crate::relay::{decode_request, resolve_model, EventWriter, Session, SessionContext};
use crate::AppState;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");
const X_ACCEL_EXPIRES: HeaderName = HeaderName::from_static("x-accel-expires");

/// Headers that keep proxies from buffering or caching the event stream.
fn stream_headers() -> [(HeaderName, &'static str); 5] {
    [
        (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (X_ACCEL_BUFFERING, "no"),
        (X_ACCEL_EXPIRES, "0"),
    ]
}

/// POST /api/chat/stream - relay an upstream chat generation as server-sent events
///
/// Everything up to the upstream status line fails with a JSON error. Once the
/// upstream stream is open the status is committed and the session task owns
/// the rest of the response.
async fn chat_stream(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let request = decode_request(&body)?;
    let request = resolve_model(&state.registry, request)?;

    let stream_config = &state.config.stream;
    let ctx = SessionContext::new(stream_config.total_timeout());
    tracing::info!(
        session_id = %ctx.id(),
        model = request.model.as_deref().unwrap_or_default(),
        messages = request.messages.len(),
        thinking = request.thinking_mode.unwrap_or(false),
        "Chat stream requested"
    );

    let upstream = state.forwarder.open(&request, &ctx).await.map_err(|e| {
        if e.client_gone() {
            tracing::debug!(session_id = %ctx.id(), error = %e, "Session ended before upstream opened");
        } else {
            tracing::warn!(session_id = %ctx.id(), error = %e, "Failed to open upstream stream");
        }
        e
    })?;

    let (writer, rx) = EventWriter::channel(stream_config.channel_capacity);
    let session = Session::new(ctx, writer, stream_config.heartbeat_interval());
    tokio::spawn(session.run(upstream));

    let body = Body::from_stream(ReceiverStream::new(rx));
    Ok((stream_headers(), body).into_response())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/chat/stream", post(chat_stream))
        .with_state(state)
}
