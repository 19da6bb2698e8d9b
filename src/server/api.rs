use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_typed_multipart::TypedMultipart;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use log::info;
use serde_json::{Value, json};
use uuid::Uuid;

use super::error::{AppError, Result};
use super::state::AppState;
use super::types::*;
use crate::indexer::{DuplicateAction, DuplicateStrategy};
use crate::library::LibraryKey;
use crate::matcher;
use crate::search::{ImageSubject, SearchFilters, SearchResult};

/// 启动一次扫描
///
/// 项目库扫描必须用重复的 path 参数指定扫描根目录；永久库始终使用配置的根目录。
#[utoipa::path(get, path = "/api/scan", responses((status = 200)))]
pub async fn scan(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScanQuery>,
) -> Result<Json<Value>> {
    let target = parse_library(query.target.as_deref())?;
    let roots = match &target {
        LibraryKey::Permanent => None,
        LibraryKey::Project(id) => {
            require_project(&state, id).await?;
            if query.paths.is_empty() {
                return Err(AppError::bad_request("项目库扫描必须指定路径参数（path）"));
            }
            Some(query.paths.iter().map(PathBuf::from).collect())
        }
    };
    let started = state.scanner.spawn_scan(false, target, roots);
    let status = if started { "start scanning" } else { "already scanning" };
    Ok(Json(json!({ "status": status })))
}

/// 扫描进度
#[utoipa::path(get, path = "/api/status", responses((status = 200, body = StatusResponse)))]
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse::new(state.scanner.status(), state.caches.total_entries()))
}

/// 清空搜索缓存
#[utoipa::path(post, path = "/api/clean_cache", responses((status = 204)))]
pub async fn clean_cache(State(state): State<Arc<AppState>>) -> StatusCode {
    state.caches.clear_all();
    StatusCode::NO_CONTENT
}

/// 上传文件，返回后续搜索使用的 upload_id
#[utoipa::path(
    post,
    path = "/api/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses((status = 200, body = UploadResponse))
)]
pub async fn upload(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<UploadRequest>,
) -> Result<Json<UploadResponse>> {
    let bytes = &data.file.contents;
    if bytes.is_empty() {
        return Err(AppError::bad_request("上传文件为空"));
    }
    let upload_id = blake3::hash(bytes).to_hex().to_string();
    tokio::fs::create_dir_all(&state.upload_dir).await?;
    tokio::fs::write(state.upload_dir.join(&upload_id), bytes).await?;
    info!("文件已上传: {upload_id} ({} 字节)", bytes.len());
    Ok(Json(UploadResponse { upload_id }))
}

/// 素材搜索
#[utoipa::path(
    post,
    path = "/api/match",
    request_body = MatchRequest,
    responses((status = 200, body = [MatchResultItem]))
)]
pub async fn match_assets(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MatchRequest>,
) -> Result<Response> {
    let library = resolve_library(&state, &req).await?;
    let options = state.engine.options();
    let positive_threshold = req.positive_threshold.unwrap_or(options.positive_threshold);
    let negative_threshold = req.negative_threshold.unwrap_or(options.negative_threshold);
    let image_threshold = req.image_threshold.unwrap_or(options.image_threshold);
    let top_n = req.top_n.unwrap_or(options.max_results);
    let filters = SearchFilters {
        path: req.path.clone().filter(|p| !p.is_empty()),
        start_time: req.start_time,
        end_time: req.end_time,
    };

    let results = match req.search_type {
        0 => {
            state
                .engine
                .search_image_by_text(
                    &library,
                    &req.positive,
                    &req.negative,
                    positive_threshold,
                    negative_threshold,
                    filters,
                )
                .await?
        }
        1 => {
            let bytes = load_upload(&state, req.upload_id.as_deref()).await?;
            state
                .engine
                .search_image_by_image(
                    &library,
                    ImageSubject::Upload(bytes),
                    image_threshold,
                    filters,
                )
                .await?
        }
        2 => {
            state
                .engine
                .search_video_by_text(
                    &library,
                    &req.positive,
                    &req.negative,
                    positive_threshold,
                    negative_threshold,
                    filters,
                )
                .await?
        }
        3 => {
            let bytes = load_upload(&state, req.upload_id.as_deref()).await?;
            state
                .engine
                .search_video_by_image(
                    &library,
                    ImageSubject::Upload(bytes),
                    image_threshold,
                    filters,
                )
                .await?
        }
        4 => {
            let bytes = load_upload(&state, req.upload_id.as_deref()).await?;
            let score = state.engine.match_text_and_image(&req.positive, &bytes).await?;
            return Ok(Json(json!({ "score": format!("{:.2}", score * 100.0) }))
                .into_response());
        }
        5 | 6 => {
            let img_id =
                req.img_id.ok_or_else(|| AppError::bad_request("缺少 img_id 参数"))?;
            let subject = ImageSubject::Stored(img_id);
            if req.search_type == 5 {
                state
                    .engine
                    .search_image_by_image(&library, subject, image_threshold, filters)
                    .await?
            } else {
                state
                    .engine
                    .search_video_by_image(&library, subject, image_threshold, filters)
                    .await?
            }
        }
        7 => {
            let keyword =
                req.path.as_deref().ok_or_else(|| AppError::bad_request("缺少 path 参数"))?;
            state.engine.search_images_by_path_keyword(&library, keyword).await?
        }
        8 => {
            let keyword =
                req.path.as_deref().ok_or_else(|| AppError::bad_request("缺少 path 参数"))?;
            state.engine.search_videos_by_path_keyword(&library, keyword).await?
        }
        other => {
            return Err(AppError::bad_request(format!("search_type 不正确: {other}")));
        }
    };

    Ok(Json(render_results(results, top_n)).into_response())
}

/// 下载库内图片
pub async fn get_image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<LibraryQuery>,
) -> Result<Response> {
    let library = parse_library(query.library.as_deref())?;
    let record = state
        .engine
        .get_image(&library, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("图片不存在: {id}")))?;
    let bytes = tokio::fs::read(&record.path)
        .await
        .map_err(|_| AppError::not_found("图片文件已不存在"))?;
    Ok(([(header::CONTENT_TYPE, mime_for(&record.path))], bytes).into_response())
}

/// 下载库内视频，路径为 urlsafe base64 编码
pub async fn get_video(
    State(state): State<Arc<AppState>>,
    Path(encoded): Path<String>,
    Query(query): Query<LibraryQuery>,
) -> Result<Response> {
    let library = parse_library(query.library.as_deref())?;
    let path = URL_SAFE
        .decode(&encoded)
        .ok()
        .and_then(|b| String::from_utf8(b).ok())
        .ok_or_else(|| AppError::bad_request("视频路径编码不正确"))?;
    if !state.engine.video_exists(&library, &path).await? {
        return Err(AppError::not_found("视频不存在"));
    }
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::not_found("视频文件已不存在"))?;
    Ok(([(header::CONTENT_TYPE, mime_for(&path))], bytes).into_response())
}

/// 提交批量索引任务
#[utoipa::path(
    post,
    path = "/api/batch_index",
    request_body = BatchIndexRequest,
    responses((status = 200, body = BatchIndexResponse))
)]
pub async fn batch_index_submit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchIndexRequest>,
) -> Result<Json<BatchIndexResponse>> {
    let target = parse_library(Some(&req.target))?;
    if let LibraryKey::Project(id) = &target {
        require_project(&state, id).await?;
    }
    let strategy = req
        .duplicate_strategy
        .as_deref()
        .unwrap_or("ask")
        .parse::<DuplicateStrategy>()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let task_id = state
        .indexer
        .submit(target, req.files, strategy)
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(BatchIndexResponse { task_id: task_id.to_string() }))
}

/// 查询批量索引任务状态
#[utoipa::path(
    get,
    path = "/api/batch_index/{id}/status",
    responses((status = 200, body = TaskStatusResponse), (status = 404))
)]
pub async fn batch_index_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskStatusResponse>> {
    let snapshot = state
        .indexer
        .snapshot(&id)
        .ok_or_else(|| AppError::not_found(format!("任务不存在: {id}")))?;
    Ok(Json(snapshot.into()))
}

/// 提交重复文件决策
#[utoipa::path(
    post,
    path = "/api/batch_index/{id}/decision",
    request_body = DecisionRequest,
    responses((status = 200))
)]
pub async fn batch_index_decision(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<Value>> {
    let action = req
        .action
        .parse::<DuplicateAction>()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    state
        .indexer
        .decide(&id, action, req.apply_to_all)
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(json!({ "status": "ok" })))
}

/// 取消批量索引任务
#[utoipa::path(delete, path = "/api/batch_index/{id}", responses((status = 200)))]
pub async fn batch_index_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>> {
    state.indexer.cancel(&id).map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(json!({ "status": "cancelling" })))
}

/// 项目列表
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListProjectsQuery>,
) -> Result<Json<Vec<ProjectResponse>>> {
    let projects = state
        .libraries
        .list_projects(query.status.as_deref(), query.include_deleted)
        .await?;
    Ok(Json(projects.into_iter().map(Into::into).collect()))
}

/// 创建项目
#[utoipa::path(
    post,
    path = "/api/projects",
    request_body = CreateProjectRequest,
    responses((status = 200, body = ProjectResponse))
)]
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Json<ProjectResponse>> {
    let project = state
        .libraries
        .create_project(&req.name)
        .await
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(project.into()))
}

/// 项目详情
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProjectResponse>> {
    let project = state
        .libraries
        .get_project(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("项目不存在: {id}")))?;
    Ok(Json(project.into()))
}

/// 修改项目
pub async fn update_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectResponse>> {
    let project = state
        .libraries
        .update_project(&id, req.name.as_deref(), req.status.as_deref())
        .await
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(project.into()))
}

/// 删除项目，默认软删除
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteProjectQuery>,
) -> Result<Json<Value>> {
    state
        .libraries
        .delete_project(&id, query.hard)
        .await
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(json!({ "status": "deleted", "hard": query.hard })))
}

/// 把项目图片归档到永久库
#[utoipa::path(
    post,
    path = "/api/projects/{id}/archive",
    request_body = ArchiveRequest,
    responses((status = 200, body = ArchiveResponse))
)]
pub async fn archive_images(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ArchiveRequest>,
) -> Result<Json<ArchiveResponse>> {
    if req.ids.is_empty() {
        return Err(AppError::bad_request("ids 必须是非空数组"));
    }
    require_project(&state, &id).await?;
    let outcome = state.libraries.archive_images(&id, &req.ids).await?;
    state.caches.clear_all();
    Ok(Json(ArchiveResponse {
        archived: outcome.archived,
        skipped: outcome.skipped,
        failed: outcome.failed,
    }))
}

/// 项目内已归档的图片列表
pub async fn archived_images(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ArchivedImageItem>>> {
    require_project(&state, &id).await?;
    let images = state.libraries.archived_images(&id).await?;
    Ok(Json(
        images
            .into_iter()
            .map(|i| ArchivedImageItem {
                id: i.id,
                path: i.path,
                width: i.width,
                height: i.height,
                file_size: i.file_size,
                archived_to_id: i.archived_to_id,
            })
            .collect(),
    ))
}

/// 取消归档
pub async fn unarchive_images(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ArchiveRequest>,
) -> Result<Json<Value>> {
    if req.ids.is_empty() {
        return Err(AppError::bad_request("ids 必须是非空数组"));
    }
    require_project(&state, &id).await?;
    let count = state.libraries.unarchive_images(&id, &req.ids).await?;
    state.caches.clear_all();
    Ok(Json(json!({ "unarchived": count })))
}

fn parse_library(value: Option<&str>) -> Result<LibraryKey> {
    match value {
        None => Ok(LibraryKey::Permanent),
        Some(s) => s.parse().map_err(|e: anyhow::Error| AppError::bad_request(e.to_string())),
    }
}

/// 按请求中的 library_type/project_id 选择素材库
async fn resolve_library(state: &AppState, req: &MatchRequest) -> Result<LibraryKey> {
    match req.library_type.as_deref().unwrap_or("permanent") {
        "permanent" => Ok(LibraryKey::Permanent),
        "project" => {
            let id = req
                .project_id
                .as_deref()
                .ok_or_else(|| {
                    AppError::bad_request("library_type='project' 时必须提供 project_id")
                })?;
            require_project(state, id).await?;
            Ok(LibraryKey::Project(id.to_string()))
        }
        other => {
            Err(AppError::bad_request(format!("library_type 不支持: {other}")))
        }
    }
}

async fn require_project(state: &AppState, id: &str) -> Result<()> {
    if state.libraries.get_project(id).await?.is_none() {
        return Err(AppError::not_found(format!("项目不存在: {id}")));
    }
    Ok(())
}

/// 读取之前上传的文件内容
async fn load_upload(state: &AppState, upload_id: Option<&str>) -> Result<Vec<u8>> {
    let upload_id = upload_id.ok_or_else(|| AppError::bad_request("你没有上传文件"))?;
    if upload_id.is_empty() || !upload_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::bad_request("upload_id 不正确"));
    }
    tokio::fs::read(state.upload_dir.join(upload_id))
        .await
        .map_err(|_| AppError::bad_request("你没有上传文件"))
}

/// 截取 top_n 并计算 softmax 置信度，分数格式化为百分制
fn render_results(results: Vec<SearchResult>, top_n: usize) -> Vec<MatchResultItem> {
    let top: Vec<SearchResult> = results.into_iter().take(top_n).collect();
    let scores: Vec<f32> = top.iter().map(|r| r.score.unwrap_or(0.0)).collect();
    let softmax_scores = matcher::softmax(&scores);
    top.into_iter()
        .zip(softmax_scores)
        .map(|(r, confidence)| MatchResultItem {
            url: r.url,
            path: r.path,
            score: r.score.map(|s| format!("{:.2}", s * 100.0)),
            softmax_score: r.score.map(|_| format!("{:.2}%", confidence * 100.0)),
            start_time: r.start_time,
            end_time: r.end_time,
        })
        .collect()
}

fn mime_for(path: &str) -> &'static str {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "flv" => "video/x-flv",
        _ => "application/octet-stream",
    }
}
