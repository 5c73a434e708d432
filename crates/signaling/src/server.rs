use crate::clock::SystemClock;
use crate::config::SignalingServerConfig;
use crate::hub::{spawn_hub, HubHandle};
use crate::services::MatchmakingService;
use crate::supervisor::Supervisor;

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use shared::models::{ClientEvent, ConnectionId, ProtocolError, ServerEvent};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    hub: HubHandle,
    config: Arc<SignalingServerConfig>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    waiting: usize,
    sessions: usize,
    connections: usize,
    session_timeout_secs: u64,
    queue_max_wait_secs: u64,
}

/// Starts the hub and the timeout supervisor for `config`.
pub fn start_core(config: &SignalingServerConfig) -> (HubHandle, Supervisor) {
    let service = MatchmakingService::new(
        config.matchmaking_settings(),
        config.session_ids.generator(),
        SystemClock,
    );
    let (hub, _task) = spawn_hub(service);
    let supervisor = Supervisor::spawn(hub.clone(), config.sweep_interval);
    (hub, supervisor)
}

pub fn router(hub: HubHandle, config: Arc<SignalingServerConfig>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(healthcheck))
        .route("/ws", get(ws_upgrade))
        .with_state(AppState { hub, config })
}

pub async fn run_server(config: SignalingServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    serve(listener, config).await
}

/// Serves on an already bound listener until the server fails.
pub async fn serve(listener: TcpListener, config: SignalingServerConfig) -> anyhow::Result<()> {
    let (hub, supervisor) = start_core(&config);
    let router = router(hub, Arc::new(config));

    info!(address = %listener.local_addr()?, "Starting signaling server");
    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;
    supervisor.shutdown();
    served?;
    info!("Signaling server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

// Root handler for "/"
async fn root() -> impl IntoResponse {
    (StatusCode::OK, "Server OK!")
}

#[instrument(skip(state))]
async fn healthcheck(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<HealthResponse>), (StatusCode, Json<ErrorResponse>)> {
    let stats = state.hub.stats().await.map_err(|err| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                message: err.to_string(),
            }),
        )
    })?;
    let body = HealthResponse {
        status: "ok",
        waiting: stats.waiting,
        sessions: stats.sessions,
        connections: stats.connections,
        session_timeout_secs: state.config.session_timeout.as_secs(),
        queue_max_wait_secs: state.config.queue_max_wait.as_secs(),
    };
    Ok((StatusCode::OK, Json(body)))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let connection_id: ConnectionId = Uuid::new_v4();
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<ServerEvent>(state.config.outbound_buffer);
    if state
        .hub
        .connect(connection_id, outbound_tx.clone())
        .await
        .is_err()
    {
        warn!(%connection_id, "hub unavailable, refusing connection");
        return;
    }
    info!(%connection_id, "User connected");

    let (mut sink, mut stream) = socket.split();

    // Forward outbound events to the WebSocket client
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let text = match event.encode() {
                Ok(text) => text,
                Err(err) => {
                    warn!(%connection_id, error = %err, "could not encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(%connection_id, error = %err, "read failed");
                break;
            }
        };
        let inbound = match frame {
            Message::Text(text) => decode_frame(&text, state.config.max_chat_chars),
            Message::Binary(_) => Err(ProtocolError::UnsupportedFrame),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        match inbound {
            Ok(event) => {
                if state.hub.inbound(connection_id, event).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(%connection_id, error = %err, "rejected inbound frame");
                let _ = outbound_tx.try_send(ServerEvent::error(&err));
            }
        }
    }

    // Exactly one disconnect per connection, after the read loop is done.
    let _ = state.hub.disconnect(connection_id).await;
    drop(outbound_tx);
    let _ = writer.await;
    info!(%connection_id, "User disconnected");
}

fn decode_frame(text: &str, max_chat_chars: usize) -> Result<ClientEvent, ProtocolError> {
    let event = ClientEvent::decode(text)?;
    event.validate(max_chat_chars)?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::ErrorCode;

    #[test]
    fn test_decode_frame_applies_chat_limit() {
        let ok = decode_frame(r#"{"event":"chat","data":{"sessionId":"1","text":"hey"}}"#, 3);
        assert!(ok.is_ok());

        let too_long =
            decode_frame(r#"{"event":"chat","data":{"sessionId":"1","text":"hey!"}}"#, 3);
        assert_eq!(too_long.unwrap_err().code(), ErrorCode::PayloadTooLarge);

        let malformed = decode_frame(r#"{"event":"offer"}"#, 3);
        assert_eq!(malformed.unwrap_err().code(), ErrorCode::MalformedPayload);
    }
}
