mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::scan,
        api::status,
        api::clean_cache,
        api::upload,
        api::match_assets,
        api::batch_index_submit,
        api::batch_index_status,
        api::batch_index_decision,
        api::batch_index_cancel,
        api::create_project,
        api::archive_images,
    ),
    components(schemas(
        types::StatusResponse,
        types::UploadForm,
        types::UploadResponse,
        types::MatchRequest,
        types::MatchResultItem,
        types::BatchIndexRequest,
        types::BatchIndexResponse,
        types::TaskStatusResponse,
        types::FailedItem,
        types::DuplicateItem,
        types::PendingDuplicateItem,
        types::DuplicateSide,
        types::DecisionRequest,
        types::CreateProjectRequest,
        types::UpdateProjectRequest,
        types::ProjectResponse,
        types::ArchiveRequest,
        types::ArchiveResponse,
        types::ArchivedImageItem,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/scan", get(api::scan))
        .route("/api/status", get(api::status))
        .route("/api/clean_cache", get(api::clean_cache).post(api::clean_cache))
        .route("/api/upload", post(api::upload))
        .route("/api/match", post(api::match_assets))
        .route("/api/get_image/{id}", get(api::get_image))
        .route("/api/get_video/{path}", get(api::get_video))
        .route("/api/batch_index", post(api::batch_index_submit))
        .route("/api/batch_index/{id}/status", get(api::batch_index_status))
        .route("/api/batch_index/{id}/decision", post(api::batch_index_decision))
        .route("/api/batch_index/{id}", delete(api::batch_index_cancel))
        .route("/api/projects", get(api::list_projects).post(api::create_project))
        .route(
            "/api/projects/{id}",
            get(api::get_project).put(api::update_project).delete(api::delete_project),
        )
        .route("/api/projects/{id}/archive", post(api::archive_images))
        .route("/api/projects/{id}/archived", get(api::archived_images))
        .route("/api/projects/{id}/unarchive", post(api::unarchive_images))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), check_token));

    Router::new()
        .merge(api)
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：100M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 100))
        .with_state(state)
}

/// 请求鉴权，校验 Authorization 头中的 token
async fn check_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
        .is_some_and(|v| v == state.token);
    if authorized {
        next.run(request).await
    } else {
        (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": "token 不正确" })))
            .into_response()
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
