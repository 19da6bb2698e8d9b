use axum::body::Bytes;
use axum_typed_multipart::{FieldData, TryFromMultipart};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::ProjectRecord;
use crate::indexer::TaskSnapshot;
use crate::scanner::ScanStatus;

/// 扫描请求参数，path 可重复出现
#[derive(Debug)]
pub struct ScanQuery {
    /// 目标素材库，默认永久库
    pub target: Option<String>,
    /// 项目库扫描的自定义根目录
    pub paths: Vec<String>,
}

// 查询串里同名的 path 参数可以重复出现，派生实现无法表达，手写逐个收集
impl<'de> Deserialize<'de> for ScanQuery {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct QueryVisitor;

        impl<'de> serde::de::Visitor<'de> for QueryVisitor {
            type Value = ScanQuery;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("扫描请求的查询参数")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<ScanQuery, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut target = None;
                let mut paths = Vec::new();
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "target" => target = Some(map.next_value::<String>()?),
                        "path" => paths.push(map.next_value::<String>()?),
                        _ => {
                            map.next_value::<serde::de::IgnoredAny>()?;
                        }
                    }
                }
                Ok(ScanQuery { target, paths })
            }
        }

        deserializer.deserialize_map(QueryVisitor)
    }
}

/// 扫描状态响应
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    pub scanning: bool,
    pub total: usize,
    pub processed: usize,
    /// 进度，0.0 到 1.0
    pub progress: f64,
    pub new_images: usize,
    pub new_videos: usize,
    pub deleted: usize,
    /// 预计剩余秒数
    pub remain_seconds: u64,
    /// 缓存中的条目总数
    pub cache_entries: usize,
}

impl StatusResponse {
    pub fn new(status: ScanStatus, cache_entries: usize) -> Self {
        Self {
            scanning: status.scanning,
            total: status.total,
            processed: status.processed,
            progress: status.progress,
            new_images: status.new_images,
            new_videos: status.new_videos,
            deleted: status.deleted,
            remain_seconds: status.remain_seconds,
            cache_entries,
        }
    }
}

/// 上传请求
#[derive(TryFromMultipart)]
pub struct UploadRequest {
    pub file: FieldData<Bytes>,
}

/// 上传表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct UploadForm {
    /// 上传的文件
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: String,
}

/// 上传响应，upload_id 用于后续搜索请求
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub upload_id: String,
}

/// 搜索请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct MatchRequest {
    /// 0=文搜图 1=图搜图 2=文搜视频 3=图搜视频 4=图文比对
    /// 5=以库内图搜图 6=以库内图搜视频 7=路径搜图 8=路径搜视频
    pub search_type: u8,
    #[serde(default)]
    pub positive: String,
    #[serde(default)]
    pub negative: String,
    pub positive_threshold: Option<u32>,
    pub negative_threshold: Option<u32>,
    pub image_threshold: Option<u32>,
    /// search_type 为 5/6 时的库内图片 ID
    pub img_id: Option<i64>,
    /// 路径过滤子串，7/8 时作为搜索关键词
    pub path: Option<String>,
    /// 修改时间过滤下界（Unix 秒）
    pub start_time: Option<i64>,
    /// 修改时间过滤上界（Unix 秒）
    pub end_time: Option<i64>,
    pub top_n: Option<usize>,
    /// permanent 或 project
    pub library_type: Option<String>,
    pub project_id: Option<String>,
    /// 上传文件的标识，search_type 为 1/3/4 时必填
    pub upload_id: Option<String>,
}

/// 单条搜索结果
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchResultItem {
    pub url: String,
    pub path: String,
    /// 百分制分数，保留两位小数
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub softmax_score: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

/// 批量索引请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchIndexRequest {
    pub files: Vec<String>,
    pub target: String,
    /// ask / skip / overwrite，默认 ask
    pub duplicate_strategy: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchIndexResponse {
    pub task_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FailedItem {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DuplicateItem {
    pub path: String,
    pub existing_path: String,
    pub action: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PendingDuplicateItem {
    pub new_file: DuplicateSide,
    pub existing_file: DuplicateSide,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DuplicateSide {
    pub path: String,
    pub size: Option<i64>,
    pub mtime: i64,
}

/// 任务状态响应
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: String,
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: Vec<FailedItem>,
    pub duplicates: Vec<DuplicateItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_duplicate: Option<PendingDuplicateItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub remain_seconds: u64,
}

impl From<TaskSnapshot> for TaskStatusResponse {
    fn from(snapshot: TaskSnapshot) -> Self {
        Self {
            task_id: snapshot.id.to_string(),
            status: snapshot.status.as_str().to_string(),
            total: snapshot.total,
            processed: snapshot.processed,
            success: snapshot.success,
            failed: snapshot
                .failed
                .into_iter()
                .map(|f| FailedItem { path: f.path, error: f.error })
                .collect(),
            duplicates: snapshot
                .duplicates
                .into_iter()
                .map(|d| DuplicateItem {
                    path: d.path,
                    existing_path: d.existing_path,
                    action: d.action,
                })
                .collect(),
            current_file: snapshot.current_file,
            pending_duplicate: snapshot.pending_duplicate.map(|p| PendingDuplicateItem {
                new_file: DuplicateSide {
                    path: p.path,
                    size: p.file_size,
                    mtime: p.modify_time,
                },
                existing_file: DuplicateSide {
                    path: p.existing_path,
                    size: p.existing_file_size,
                    mtime: p.existing_modify_time,
                },
            }),
            error: snapshot.error,
            remain_seconds: snapshot.remain_seconds,
        }
    }
}

/// 重复决策请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct DecisionRequest {
    /// skip 或 overwrite
    pub action: String,
    #[serde(default)]
    pub apply_to_all: bool,
}

/// 项目列表查询参数
#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    pub status: Option<String>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub status: Option<String>,
}

/// 项目删除参数
#[derive(Debug, Deserialize)]
pub struct DeleteProjectQuery {
    /// 是否彻底删除（移除数据库文件）
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProjectResponse {
    pub id: String,
    pub name: String,
    pub status: String,
    pub is_deleted: bool,
    pub image_count: i64,
    pub video_count: i64,
    pub created_time: i64,
    pub updated_time: i64,
}

impl From<ProjectRecord> for ProjectResponse {
    fn from(p: ProjectRecord) -> Self {
        Self {
            id: p.id,
            name: p.name,
            status: p.status,
            is_deleted: p.is_deleted,
            image_count: p.image_count,
            video_count: p.video_count,
            created_time: p.created_time,
            updated_time: p.updated_time,
        }
    }
}

/// 归档/取消归档请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct ArchiveRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ArchiveResponse {
    pub archived: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// 素材下载接口的库选择参数
#[derive(Debug, Deserialize)]
pub struct LibraryQuery {
    pub library: Option<String>,
}

/// 库内图片信息
#[derive(Debug, Serialize, ToSchema)]
pub struct ArchivedImageItem {
    pub id: i64,
    pub path: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub file_size: Option<i64>,
    pub archived_to_id: Option<i64>,
}
