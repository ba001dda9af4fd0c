use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{
    ErrorResponse, OcrRequest, OcrResponse, StatusResponse, TranslateRequest, TranslateResponse,
};
use super::process::{ServerError, ocr_request, translate_request};
use super::state::ServerState;
use crate::service::OcrService;
use crate::settings::Settings;

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn run_server(settings: Settings, addr: String) -> Result<()> {
    let service = OcrService::from_settings(&settings)?;
    if settings.server.warm_up {
        let engine = service.engine().clone();
        tokio::spawn(async move {
            info!("pre-initializing the recognition engine");
            match engine.label().await {
                Ok(label) => info!("recognition engine ready: {}", label),
                Err(err) => warn!("engine warm-up failed; will retry on first use: {:#}", err),
            }
        });
    }

    let app = router(Arc::new(ServerState { service }));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind server address: {}", addr))?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/api/health", get(health).post(health))
        .route("/api/test", get(test).post(test))
        .route("/api/ocr", post(ocr))
        .route("/api/translate", post(translate))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn health() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        message: "OCR server is running".to_string(),
        engine_ready: None,
    })
}

/// Connectivity check that also warms the engine so the first OCR request
/// does not pay for initialization.
async fn test(State(state): State<Arc<ServerState>>) -> Json<StatusResponse> {
    info!("test endpoint called");
    let engine = state.service.engine();
    if let Err(err) = engine.get().await {
        warn!("could not pre-initialize the recognition engine: {:#}", err);
    }
    Json(StatusResponse {
        status: "ok",
        message: "Connection successful".to_string(),
        engine_ready: Some(engine.is_ready()),
    })
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn ocr(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<OcrRequest>, JsonRejection>,
) -> Result<Json<OcrResponse>, ApiError> {
    info!("received OCR request");
    let Json(request) = payload.map_err(rejected)?;
    match ocr_request(state.as_ref(), request).await {
        Ok(response) => Ok(Json(response)),
        Err(err) => Err(failed(err)),
    }
}

async fn translate(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<TranslateRequest>, JsonRejection>,
) -> Result<Json<TranslateResponse>, ApiError> {
    let Json(request) = payload.map_err(rejected)?;
    match translate_request(state.as_ref(), request).await {
        Ok(response) => Ok(Json(response)),
        Err(err) => Err(failed(err)),
    }
}

fn rejected(rejection: JsonRejection) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: rejection.body_text(),
        }),
    )
}

fn failed(err: ServerError) -> ApiError {
    if err.status.is_server_error() {
        warn!("request failed: {}", err.message);
    }
    (err.status, Json(ErrorResponse { error: err.message }))
}
