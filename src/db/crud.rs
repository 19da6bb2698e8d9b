use sqlx::{Result, Row, SqlitePool};

use super::{ImageRecord, ProjectRecord, VideoFrameRecord};
use crate::embed::FrameEmbedding;
use crate::matcher;

/// 图片总数
pub async fn image_count(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM image").fetch_one(pool).await?;
    row.try_get("count")
}

/// 视频总数（按路径去重）
pub async fn video_count(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(DISTINCT path) AS count FROM video")
        .fetch_one(pool)
        .await?;
    row.try_get("count")
}

/// 按路径查询图片的指纹信息
pub async fn get_image_fingerprint(
    pool: &SqlitePool,
    path: &str,
) -> Result<Option<(i64, Option<Vec<u8>>)>> {
    let row = sqlx::query("SELECT modify_time, checksum FROM image WHERE path = ?")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    row.map(|r| Ok((r.try_get("modify_time")?, r.try_get("checksum")?))).transpose()
}

/// 按路径查询视频的指纹信息（任取一帧即可，同路径各帧一致）
pub async fn get_video_fingerprint(
    pool: &SqlitePool,
    path: &str,
) -> Result<Option<(i64, Option<Vec<u8>>)>> {
    let row = sqlx::query("SELECT modify_time, checksum FROM video WHERE path = ? LIMIT 1")
        .bind(path)
        .fetch_optional(pool)
        .await?;
    row.map(|r| Ok((r.try_get("modify_time")?, r.try_get("checksum")?))).transpose()
}

#[allow(clippy::too_many_arguments)]
pub async fn upsert_image(
    pool: &SqlitePool,
    path: &str,
    modify_time: i64,
    checksum: Option<&[u8]>,
    features: &[u8],
    phash: Option<&[u8]>,
    width: Option<i64>,
    height: Option<i64>,
    file_size: Option<i64>,
) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO image (path, modify_time, checksum, features, phash, width, height, file_size)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            modify_time = excluded.modify_time,
            checksum = excluded.checksum,
            features = excluded.features,
            phash = excluded.phash,
            width = excluded.width,
            height = excluded.height,
            file_size = excluded.file_size
        RETURNING id
        "#,
    )
    .bind(path)
    .bind(modify_time)
    .bind(checksum)
    .bind(features)
    .bind(phash)
    .bind(width)
    .bind(height)
    .bind(file_size)
    .fetch_one(pool)
    .await?;
    row.try_get("id")
}

/// 替换视频的全部帧记录
///
/// 删除旧帧与写入新帧在一个事务内提交，保证单个素材的写入原子性。
/// 新旧版本的帧数可以不同。
pub async fn replace_video(
    pool: &SqlitePool,
    path: &str,
    modify_time: i64,
    checksum: Option<&[u8]>,
    frames: &[FrameEmbedding],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM video WHERE path = ?").bind(path).execute(&mut *tx).await?;
    for frame in frames {
        sqlx::query(
            "INSERT INTO video (path, frame_time, modify_time, checksum, features) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(path)
        .bind(frame.frame_time)
        .bind(modify_time)
        .bind(checksum)
        .bind(matcher::features_to_blob(&frame.features))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// 库内全部图片路径
pub async fn all_image_paths(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT path FROM image").fetch_all(pool).await?;
    rows.into_iter().map(|r| r.try_get("path")).collect()
}

/// 库内全部视频路径（去重）
pub async fn all_video_paths(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT DISTINCT path FROM video ORDER BY path")
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(|r| r.try_get("path")).collect()
}

pub async fn delete_image_by_path(pool: &SqlitePool, path: &str) -> Result<()> {
    sqlx::query("DELETE FROM image WHERE path = ?").bind(path).execute(pool).await?;
    Ok(())
}

pub async fn delete_video_by_path(pool: &SqlitePool, path: &str) -> Result<()> {
    sqlx::query("DELETE FROM video WHERE path = ?").bind(path).execute(pool).await?;
    Ok(())
}

pub async fn delete_image_by_id(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM image WHERE id = ?").bind(id).execute(pool).await?;
    Ok(())
}

/// 全部图片记录，搜索时整库扫描
pub async fn all_images(pool: &SqlitePool) -> Result<Vec<ImageRecord>> {
    sqlx::query_as::<_, ImageRecord>("SELECT * FROM image").fetch_all(pool).await
}

pub async fn get_image_by_id(pool: &SqlitePool, id: i64) -> Result<Option<ImageRecord>> {
    sqlx::query_as::<_, ImageRecord>("SELECT * FROM image WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// 按感知哈希精确查找已有图片，用于批量索引的重复检测
pub async fn find_image_by_phash(
    pool: &SqlitePool,
    phash: &[u8],
) -> Result<Option<ImageRecord>> {
    sqlx::query_as::<_, ImageRecord>("SELECT * FROM image WHERE phash = ? LIMIT 1")
        .bind(phash)
        .fetch_optional(pool)
        .await
}

/// 路径子串搜索图片
pub async fn search_images_by_path(
    pool: &SqlitePool,
    keyword: &str,
    limit: i64,
) -> Result<Vec<(i64, String)>> {
    let pattern = format!("%{}%", keyword);
    let rows = sqlx::query("SELECT id, path FROM image WHERE path LIKE ? ORDER BY path ASC LIMIT ?")
        .bind(pattern)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(|r| Ok((r.try_get("id")?, r.try_get("path")?))).collect()
}

/// 路径子串搜索视频
pub async fn search_videos_by_path(
    pool: &SqlitePool,
    keyword: &str,
    limit: i64,
) -> Result<Vec<String>> {
    let pattern = format!("%{}%", keyword);
    let rows = sqlx::query(
        "SELECT DISTINCT path FROM video WHERE path LIKE ? ORDER BY path ASC LIMIT ?",
    )
    .bind(pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(|r| r.try_get("path")).collect()
}

/// 某视频的全部帧记录，按时间升序
pub async fn video_frames_by_path(
    pool: &SqlitePool,
    path: &str,
) -> Result<Vec<VideoFrameRecord>> {
    sqlx::query_as::<_, VideoFrameRecord>(
        "SELECT * FROM video WHERE path = ? ORDER BY frame_time ASC",
    )
    .bind(path)
    .fetch_all(pool)
    .await
}

pub async fn delete_video_frame_by_id(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM video WHERE id = ?").bind(id).execute(pool).await?;
    Ok(())
}

pub async fn video_path_exists(pool: &SqlitePool, path: &str) -> Result<bool> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM video WHERE path = ?")
        .bind(path)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get::<i64, _>("count")? > 0)
}

/// 归档时向永久库插入图片副本，特征字节原样复制
pub async fn insert_image_copy(pool: &SqlitePool, image: &ImageRecord) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO image (path, modify_time, checksum, features, phash, width, height, file_size)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&image.path)
    .bind(image.modify_time)
    .bind(&image.checksum)
    .bind(&image.features)
    .bind(&image.phash)
    .bind(image.width)
    .bind(image.height)
    .bind(image.file_size)
    .fetch_one(pool)
    .await?;
    row.try_get("id")
}

pub async fn set_image_archived(pool: &SqlitePool, id: i64, archived_to_id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE image SET archived = 1, archived_to_id = ? WHERE id = ?")
        .bind(archived_to_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn clear_image_archived(pool: &SqlitePool, id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE image SET archived = 0, archived_to_id = NULL WHERE id = ? AND archived = 1",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn archived_images(pool: &SqlitePool) -> Result<Vec<ImageRecord>> {
    sqlx::query_as::<_, ImageRecord>("SELECT * FROM image WHERE archived = 1")
        .fetch_all(pool)
        .await
}

// ===== 项目元数据 =====

pub async fn insert_project(pool: &SqlitePool, project: &ProjectRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO project (id, name, status, is_deleted, image_count, video_count,
                             created_time, updated_time, database_path)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(&project.status)
    .bind(project.is_deleted)
    .bind(project.image_count)
    .bind(project.video_count)
    .bind(project.created_time)
    .bind(project.updated_time)
    .bind(&project.database_path)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_project(pool: &SqlitePool, id: &str) -> Result<Option<ProjectRecord>> {
    sqlx::query_as::<_, ProjectRecord>(
        "SELECT * FROM project WHERE id = ? AND is_deleted = 0",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn list_projects(
    pool: &SqlitePool,
    status: Option<&str>,
    include_deleted: bool,
) -> Result<Vec<ProjectRecord>> {
    let projects = sqlx::query_as::<_, ProjectRecord>(
        "SELECT * FROM project ORDER BY created_time DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(projects
        .into_iter()
        .filter(|p| include_deleted || !p.is_deleted)
        .filter(|p| status.is_none_or(|s| p.status == s))
        .collect())
}

pub async fn count_projects_with_prefix(pool: &SqlitePool, prefix: &str) -> Result<i64> {
    let pattern = format!("{}%", prefix);
    let row = sqlx::query("SELECT COUNT(*) AS count FROM project WHERE id LIKE ?")
        .bind(pattern)
        .fetch_one(pool)
        .await?;
    row.try_get("count")
}

pub async fn update_project(pool: &SqlitePool, project: &ProjectRecord) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE project SET name = ?, status = ?, is_deleted = ?, image_count = ?,
                           video_count = ?, updated_time = ?
        WHERE id = ?
        "#,
    )
    .bind(&project.name)
    .bind(&project.status)
    .bind(project.is_deleted)
    .bind(project.image_count)
    .bind(project.video_count)
    .bind(project.updated_time)
    .bind(&project.id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_project_row(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM project WHERE id = ?").bind(id).execute(pool).await?;
    Ok(())
}
