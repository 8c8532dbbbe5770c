use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::env::Env;
use crate::orchestrator::{Orchestrator, image_url};
use crate::providers::ProviderRegistry;
use crate::store::{ImageRecord, ImageStore, StoreError};
use crate::EaselError;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Orchestrator,
    registry: Arc<ProviderRegistry>,
    store: ImageStore,
    env: Arc<Env>,
}

impl AppState {
    pub fn new(registry: ProviderRegistry, store: ImageStore, env: Env) -> Self {
        let registry = Arc::new(registry);
        Self {
            orchestrator: Orchestrator::new(Arc::clone(&registry), store.clone()),
            registry,
            store,
            env: Arc::new(env),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/images/generate", post(generate_image))
        .route("/api/images/openai", post(generate_openai_image))
        .route("/api/images", get(list_images))
        .route("/api/images/:image_id", get(get_image))
        .route("/api/images/:image_id/file", get(get_image_file))
        .route("/api/runs", get(list_runs))
        .route("/api/providers", get(provider_metadata))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "service": "easel"}))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl ListParams {
    fn clamped(&self, default_limit: i64, max_limit: i64) -> (i64, i64) {
        let limit = self.limit.unwrap_or(default_limit).clamp(1, max_limit);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

async fn generate_image(State(state): State<AppState>, body: Option<Json<Value>>) -> Response {
    let payload = body.map(|Json(value)| value).unwrap_or_else(|| json!({}));
    respond_generation(&state, payload).await
}

async fn generate_openai_image(
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Response {
    let mut payload = body.map(|Json(value)| value).unwrap_or_else(|| json!({}));
    if !payload.is_object() {
        payload = json!({});
    }
    if let Some(map) = payload.as_object_mut() {
        map.insert("provider".to_string(), json!("openai"));
    }
    respond_generation(&state, payload).await
}

async fn respond_generation(state: &AppState, payload: Value) -> Response {
    match state.orchestrator.generate(&payload, &state.env).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => generation_error(err),
    }
}

/// Field-specific input errors are safe to echo; every other failure is
/// logged in full and reported under one generic category.
fn generation_error(err: EaselError) -> Response {
    if let EaselError::InvalidInput(message) = &err {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response();
    }

    tracing::error!(error = %err, "image generation failed");
    let status = if err.is_persistence_failure() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(json!({"error": "Image generation failed"}))).into_response()
}

fn store_error(err: StoreError) -> Response {
    tracing::error!(error = %err, "image store query failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Image store unavailable"})),
    )
        .into_response()
}

fn record_json(record: &ImageRecord) -> Value {
    let mut value = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
    if let Some(map) = value.as_object_mut() {
        map.insert("image_url".to_string(), json!(image_url(&record.id)));
    }
    value
}

async fn list_images(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let (limit, offset) = params.clamped(50, 200);
    match state.store.list_generations(limit, offset).await {
        Ok(records) => {
            let body: Vec<Value> = records.iter().map(record_json).collect();
            Json(body).into_response()
        }
        Err(err) => store_error(err),
    }
}

async fn get_image(State(state): State<AppState>, Path(image_id): Path<String>) -> Response {
    match state.store.get_generation(&image_id).await {
        Ok(Some(record)) => Json(record_json(&record)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Image not found"})),
        )
            .into_response(),
        Err(err) => store_error(err),
    }
}

async fn get_image_file(State(state): State<AppState>, Path(image_id): Path<String>) -> Response {
    let path = match state.store.image_file_path(&image_id).await {
        Ok(Some(path)) => path,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Image file not found"})),
            )
                .into_response();
        }
        Err(err) => return store_error(err),
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(err) => {
            tracing::error!(%image_id, error = %err, "image file read failed");
            (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Image file not found"})),
            )
                .into_response()
        }
    }
}

async fn list_runs(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let (limit, offset) = params.clamped(25, 100);
    match state.store.list_runs(limit, offset).await {
        Ok(runs) => {
            let body: Vec<Value> = runs
                .iter()
                .map(|run| {
                    json!({
                        "run_id": run.run_id,
                        "created_at": run.created_at,
                        "image_count": run.image_count,
                        "images": run.images.iter().map(record_json).collect::<Vec<_>>(),
                    })
                })
                .collect();
            Json(body).into_response()
        }
        Err(err) => store_error(err),
    }
}

async fn provider_metadata(State(state): State<AppState>) -> Response {
    Json(state.registry.metadata()).into_response()
}
