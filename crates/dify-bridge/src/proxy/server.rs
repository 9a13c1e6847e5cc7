//! OpenAI-compatible HTTP front end
//!
//! Serves `POST /v1/chat/completions` on top of the portal backend:
//! - Requests are translated and dispatched as streaming backend turns
//! - Each dispatched turn is relayed and reaped in its own task
//! - Dispatch failures surface as HTTP 500 with the backend's body

use axum::{
    Json, Router,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

use crate::auth::CredentialBundle;
use crate::config::Config;
use crate::error::{BridgeError, Result};

use super::backend::BackendClient;
use super::openai::{ChatCompletionRequest, ResponseMeta};
use super::reaper::ConversationReaper;
use super::session::{SessionKey, SessionStore};
use super::streaming::{ChunkEmitter, RelayOutcome, RelaySink, StreamRelay, Termination};
use super::translation::RequestTranslator;

/// Frames buffered between the relay task and the response body
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Shared application state for all handlers
#[derive(Debug)]
pub struct AppState {
    /// Bridge configuration
    pub config: Config,
    /// Session key → backend conversation id
    pub sessions: Arc<SessionStore>,
    pub translator: RequestTranslator,
    /// Backend HTTP client carrying the shared credentials
    pub backend: Arc<BackendClient>,
    pub reaper: ConversationReaper,
}

impl AppState {
    pub fn new(config: Config, credentials: Arc<CredentialBundle>) -> Result<Self> {
        let backend = Arc::new(BackendClient::new(&config.backend, credentials)?);
        let reaper =
            ConversationReaper::new(backend.clone(), config.backend.auto_delete_conversations);
        let translator = RequestTranslator::new(config.server.session_header.clone());

        Ok(Self {
            config,
            sessions: Arc::new(SessionStore::new()),
            translator,
            backend,
            reaper,
        })
    }

    /// Model name reported in every response
    pub fn model(&self) -> &str {
        &self.backend.credentials().model
    }
}

/// The bridge server
pub struct BridgeServer {
    state: Arc<AppState>,
}

impl BridgeServer {
    pub fn new(config: Config, credentials: Arc<CredentialBundle>) -> Result<Self> {
        Ok(Self {
            state: Arc::new(AppState::new(config, credentials)?),
        })
    }

    /// Bind the listen address and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let config = &self.state.config;
        let addr: SocketAddr = config
            .server
            .listen_addr
            .parse()
            .map_err(|e| BridgeError::Config(format!("Invalid listen address: {e}")))?;

        tracing::info!("Starting bridge server on {addr}");
        tracing::info!("Backend: {}", config.backend.base_url);
        tracing::info!("Session header: {}", config.server.session_header);
        if self.state.reaper.is_enabled() {
            tracing::info!("Conversations are deleted after each turn");
        } else {
            tracing::info!("Conversation auto-delete disabled");
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Proxy(format!("Failed to bind to {addr}: {e}")))?;

        let app = create_router(self.state.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| BridgeError::Proxy(format!("Server error: {e}")))?;

        tracing::info!("Bridge server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint - returns JSON status
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Handle one chat-completion request
///
/// Nothing is sent to the caller until the backend has accepted the turn;
/// from then on the turn always runs to reaping.
async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: std::result::Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response<Body> {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!("Rejected chat request: {rejection}");
            return create_error_response(
                rejection.status(),
                "invalid_request",
                &rejection.body_text(),
            );
        }
    };

    let turn = state
        .translator
        .translate(&request, &headers, &state.sessions)
        .await;

    let upstream = match state.backend.send_chat(&turn.envelope).await {
        Ok(response) => response,
        Err(e) => return e.into_response(),
    };

    let meta = ResponseMeta::new(state.model());
    tracing::debug!(
        session = %turn.session_key,
        id = %meta.id,
        stream = request.stream,
        "Backend accepted turn"
    );

    if request.stream {
        stream_response(state, turn.session_key, meta, upstream)
    } else {
        buffered_response(state, turn.session_key, meta, upstream).await
    }
}

/// Relay the turn as SSE chunks while the backend produces them
fn stream_response(
    state: Arc<AppState>,
    session_key: SessionKey,
    meta: ResponseMeta,
    upstream: reqwest::Response,
) -> Response<Body> {
    let (emitter, rx) = ChunkEmitter::channel(meta, STREAM_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let watch = emitter.clone();
        let mut sink = RelaySink::Stream(emitter);
        let outcome = relay_turn(&state, &session_key, upstream, &mut sink, async move {
            watch.closed().await
        })
        .await;

        if outcome.termination != Termination::CallerGone {
            if let RelaySink::Stream(emitter) = &sink {
                emitter.done().await;
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Relay the whole turn, then answer with one completion object
async fn buffered_response(
    state: Arc<AppState>,
    session_key: SessionKey,
    meta: ResponseMeta,
    upstream: reqwest::Response,
) -> Response<Body> {
    let (reply_tx, reply_rx) = oneshot::channel::<String>();

    tokio::spawn(async move {
        let mut reply_tx = reply_tx;
        let mut sink = RelaySink::Buffer(String::new());
        let outcome =
            relay_turn(&state, &session_key, upstream, &mut sink, reply_tx.closed()).await;

        if outcome.termination != Termination::CallerGone {
            let _ = reply_tx.send(outcome.content.unwrap_or_default());
        }
    });

    match reply_rx.await {
        Ok(content) => Json(meta.completion(content)).into_response(),
        Err(_) => create_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "relay_failed",
            "Relay ended without a result",
        ),
    }
}

/// Relay one backend turn into `sink`, then reap its conversation
async fn relay_turn<C>(
    state: &AppState,
    session_key: &SessionKey,
    upstream: reqwest::Response,
    sink: &mut RelaySink,
    caller_gone: C,
) -> RelayOutcome
where
    C: Future<Output = ()>,
{
    let relay = StreamRelay::new(&state.sessions, session_key, state.backend.idle_timeout());
    let outcome = relay.run(upstream.bytes_stream(), sink, caller_gone).await;
    let reaped = state.reaper.reap(outcome.conversation_id.as_ref()).await;

    tracing::info!(
        session = %session_key,
        termination = ?outcome.termination,
        events = outcome.events,
        malformed = outcome.malformed,
        reaped = ?reaped,
        "Turn complete"
    );
    outcome
}

/// Create a JSON error response
fn create_error_response(status: StatusCode, error_type: &str, message: &str) -> Response<Body> {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
        }
    });

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| status.into_response())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
