// =============================================================================
// Development-only HTTP/SSE transport
// =============================================================================
//
// `POST /command` and `GET /events`, both gated by the `X-Echo-Bridge-Token`
// header. Binds to loopback by default; `--bind-all` widens that with a
// loud warning, since this transport ships with no production hardening.
// =============================================================================

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::auth::EchoBridgeToken;
use crate::dispatcher::Dispatcher;
use crate::protocol::{decode_line, Response};
use crate::state::EngineState;
use crate::types::ProgressEvent;

#[derive(Clone)]
pub struct HttpState {
    pub engine: Arc<EngineState>,
    pub dispatcher: Arc<Dispatcher>,
    pub echo_token: String,
    pub progress_tx: broadcast::Sender<ProgressEvent>,
}

pub async fn run(
    engine: Arc<EngineState>,
    dispatcher: Arc<Dispatcher>,
    port: u16,
    bind_all: bool,
) -> anyhow::Result<()> {
    let echo_token = engine
    .config
    .echo_token
    .clone()
    .ok_or_else(|| anyhow::anyhow!("HTTP transport requires PRISM_ECHO_TOKEN"))?;

    let (progress_tx, _rx) = broadcast::channel(256);

    let state = HttpState {
        engine,
        dispatcher,
        echo_token,
        progress_tx,
    };

    let app = Router::new()
    .route("/command", post(post_command))
    .route("/events", get(get_events))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http())
    .with_state(state);

    let host = if bind_all {
        warn!("binding development HTTP transport to all interfaces — dev builds only");
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    };
    let addr = SocketAddr::new(host, port);

    info!(%addr, "starting development HTTP/SSE transport");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn post_command(
    State(state): State<HttpState>,
    _token: EchoBridgeToken,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    match decode_line(&body) {
        crate::protocol::DecodedLine::Command(command) => {
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let broadcast_tx = state.progress_tx.clone();
            tokio::spawn(async move {
                    while let Some(event) = progress_rx.recv().await {
                        let _ = broadcast_tx.send(event);
                    }
                });
            let response = state.dispatcher.dispatch(&state.engine, command, progress_tx).await;
            (axum::http::StatusCode::OK, Json(response))
        }
        crate::protocol::DecodedLine::Blank => (
            axum::http::StatusCode::BAD_REQUEST,
            Json(Response::error(None, serde_json::Value::Null, crate::error::ErrorCode::InvalidCommand, "empty body")),
        ),
        crate::protocol::DecodedLine::Error(e) => (
            axum::http::StatusCode::BAD_REQUEST,
            Json(Response::error(e.command_name, e.id.unwrap_or(serde_json::Value::Null), e.code, e.message)),
        ),
    }
}

async fn get_events(
    State(state): State<HttpState>,
    _token: EchoBridgeToken,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.progress_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
            item.ok()
            .and_then(|event| serde_json::to_string(&event).ok())
            .map(|json| Ok(Event::default().data(json)))
        });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
