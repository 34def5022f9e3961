//! Inbound HTTP triggers.
//!
//! - `POST /webhook`: signed raw body, `X-Hub-Signature-256: sha256=<hex>`
//! - `GET|POST /api/reddit`: Vercel-style endpoint

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use postd_core::webhook::{HandlerResponse, TriggerAdapter};
use tokio_util::sync::CancellationToken;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

pub fn build_router(adapter: Arc<TriggerAdapter>) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/api/reddit", get(vercel).post(vercel))
        .route("/health", get(|| async { "ok" }))
        .with_state(adapter)
}

pub async fn serve(
    adapter: Arc<TriggerAdapter>,
    addr: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "webhook server listening");

    axum::serve(listener, build_router(adapter))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn webhook(
    State(adapter): State<Arc<TriggerAdapter>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let resp = adapter
        .handle_signed(&body, signature(&headers), Utc::now())
        .await;
    into_response(resp)
}

async fn vercel(
    State(adapter): State<Arc<TriggerAdapter>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let resp = adapter
        .handle_vercel(method.as_str(), &body, signature(&headers), Utc::now())
        .await;
    into_response(resp)
}

fn signature(headers: &HeaderMap) -> Option<&str> {
    headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok())
}

fn into_response(resp: HandlerResponse) -> Response {
    let status =
        StatusCode::from_u16(resp.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(resp.body)).into_response()
}
