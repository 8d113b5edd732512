// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::error::LauncherError;
use crate::metrics::LauncherMetrics;
use crate::server::handler::LauncherRequestHandlerTrait;
use crate::subscribe_hub::SubscriptionGuard;
use crate::types::{CreateLogRequest, GetLogsQuery, LogView, SubscribeFrame, SubscribeQuery};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use prometheus::{Registry, TextEncoder};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{info, instrument};

pub mod handler;

pub const HEALTH_PATH: &str = "/health";
pub const LAUNCH_LOGS_PATH: &str = "/launch_logs";
pub const SUBSCRIBE_PATH: &str = "/launch_logs/subscribe";
pub const METRICS_PATH: &str = "/metrics";

pub fn run_server(
    socket_address: &SocketAddr,
    handler: impl LauncherRequestHandlerTrait + Sync + Send + 'static,
    metrics: Arc<LauncherMetrics>,
    registry: Registry,
) -> tokio::task::JoinHandle<()> {
    let socket_address = *socket_address;
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(socket_address).await.unwrap();
        info!("API server listening on {}", socket_address);
        axum::serve(
            listener,
            make_router(Arc::new(handler), metrics, registry).into_make_service(),
        )
        .await
        .unwrap();
    })
}

pub(crate) fn make_router(
    handler: Arc<impl LauncherRequestHandlerTrait + Sync + Send + 'static>,
    metrics: Arc<LauncherMetrics>,
    registry: Registry,
) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route(HEALTH_PATH, get(health_check))
        .route(LAUNCH_LOGS_PATH, post(handle_create_log))
        .route(LAUNCH_LOGS_PATH, get(handle_get_logs))
        .route(SUBSCRIBE_PATH, get(handle_subscribe))
        .route(METRICS_PATH, get(handle_metrics))
        .with_state((handler, metrics, registry))
}

impl axum::response::IntoResponse for LauncherError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            LauncherError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            LauncherError::AlreadyExists(_) => StatusCode::CONFLICT,
            LauncherError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({
                "error": self.error_type(),
                "message": self.to_string(),
            })),
        )
            .into_response()
    }
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

#[instrument(level = "error", skip_all, fields(item_type = %msg.item_type, item_id = %msg.item_id))]
async fn handle_create_log(
    State((handler, metrics, _)): State<(
        Arc<impl LauncherRequestHandlerTrait + Sync + Send>,
        Arc<LauncherMetrics>,
        Registry,
    )>,
    Json(msg): Json<CreateLogRequest>,
) -> Result<Json<LogView>, LauncherError> {
    metrics.requests_received.with_label_values(&["create"]).inc();
    match handler.handle_create(msg).await {
        Ok(view) => Ok(Json(view)),
        Err(err) => {
            metrics
                .err_requests
                .with_label_values(&[err.error_type()])
                .inc();
            Err(err)
        }
    }
}

async fn handle_get_logs(
    State((handler, metrics, _)): State<(
        Arc<impl LauncherRequestHandlerTrait + Sync + Send>,
        Arc<LauncherMetrics>,
        Registry,
    )>,
    Query(query): Query<GetLogsQuery>,
) -> Result<Json<Vec<LogView>>, LauncherError> {
    metrics.requests_received.with_label_values(&["get"]).inc();
    match handler.handle_get(query).await {
        Ok(views) => Ok(Json(views)),
        Err(err) => {
            metrics
                .err_requests
                .with_label_values(&[err.error_type()])
                .inc();
            Err(err)
        }
    }
}

async fn handle_subscribe(
    State((handler, metrics, _)): State<(
        Arc<impl LauncherRequestHandlerTrait + Sync + Send>,
        Arc<LauncherMetrics>,
        Registry,
    )>,
    Query(query): Query<SubscribeQuery>,
) -> Sse<SubscriptionEventStream> {
    metrics
        .requests_received
        .with_label_values(&["subscribe"])
        .inc();
    let (guard, rx) = handler.handle_subscribe(&query.item_type, &query.item_id);
    Sse::new(SubscriptionEventStream { rx, _guard: guard }).keep_alive(KeepAlive::default())
}

async fn handle_metrics(
    State((_, _, registry)): State<(
        Arc<impl LauncherRequestHandlerTrait + Sync + Send>,
        Arc<LauncherMetrics>,
        Registry,
    )>,
) -> Result<String, LauncherError> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .map_err(|e| LauncherError::InternalError(format!("encode metrics: {e}")))
}

/// Stream adapter that turns hub frames into SSE events and keeps the hub
/// registration alive exactly as long as the connection.
pub struct SubscriptionEventStream {
    rx: mpsc::Receiver<SubscribeFrame>,
    _guard: SubscriptionGuard,
}

impl Stream for SubscriptionEventStream {
    type Item = Result<Event, axum::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Event::default().json_data(&frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
