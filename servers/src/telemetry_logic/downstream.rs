use crate::telemetry_logic::error::AppError;
use crate::telemetry_logic::state::AppState;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use lib_telemetry::connections::SampleStore;
use lib_telemetry::core::ValidationHints;
use lib_telemetry::model::{ProducerId, SampleView, StatsView};
use lib_telemetry::TelemetryError;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

/// Optional query string of the history endpoint.
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
}

/// All routes of the service, with CORS open to any origin.
pub fn router<S: SampleStore>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/students", get(students_handler::<S>))
        .route("/api/data/{id}", get(data_handler::<S>))
        .route("/api/stats", get(stats_handler::<S>))
        .route("/api/validation_errors", get(validation_errors_handler::<S>))
        .route("/ws", get(ws_handler::<S>))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Serves `router(state)` on `listener` until `shutdown` is cancelled.
pub async fn serve<S: SampleStore>(
    listener: TcpListener,
    state: AppState<S>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!("Telemetry server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Telemetry server shutting down.");
        })
        .await
}

async fn students_handler<S: SampleStore>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<ProducerId>>, AppError> {
    Ok(Json(state.query.active_producers().await?))
}

async fn data_handler<S: SampleStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<SampleView>>, AppError> {
    let producer_id: ProducerId = id
        .parse()
        .map_err(|_| AppError::BadRequest(format!("invalid student id '{}'", id)))?;
    let Query(params) = params?;
    let samples = state.query.recent_samples(producer_id, params.limit).await?;
    debug!(producer_id, returned = samples.len(), "history served");
    Ok(Json(samples))
}

async fn stats_handler<S: SampleStore>(
    State(state): State<AppState<S>>,
) -> Result<Json<StatsView>, AppError> {
    Ok(Json(state.query.stats().await?))
}

async fn validation_errors_handler<S: SampleStore>(
    State(state): State<AppState<S>>,
) -> Json<ValidationHints> {
    Json(state.query.validation_hints())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ws_handler<S: SampleStore>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<S>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| viewer_session(socket, state))
}

/// Pushes every broadcast event to one viewer until the viewer leaves, a
/// write fails or times out, the broadcaster drops it, or the server stops.
async fn viewer_session<S: SampleStore>(socket: WebSocket, state: AppState<S>) {
    let mut subscription = state.broadcaster.subscribe();
    let viewer = subscription.id();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            inbound = stream.next() => match inbound {
                // Inbound text is ignored; the channel is push-only.
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(viewer, "Viewer read failed: {}", e);
                    break;
                }
            },
            event = subscription.recv() => {
                let Some(event) = event else {
                    info!(viewer, "Viewer dropped by broadcaster, closing session");
                    break;
                };
                let frame = match serde_json::to_string(&event.to_push_message()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(viewer, "Failed to encode push frame: {}", e);
                        continue;
                    }
                };
                let reason = match tokio::time::timeout(
                    state.viewer_send_timeout,
                    sink.send(Message::Text(frame.into())),
                )
                .await
                {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => format!("send timed out after {:?}", state.viewer_send_timeout),
                };
                warn!("{}", TelemetryError::ViewerUnreachable { viewer, reason });
                break;
            }
        }
    }

    state.broadcaster.unsubscribe(viewer);
    debug!(viewer, "Viewer session ended");
}
