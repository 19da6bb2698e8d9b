use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{Datelike, Utc};
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::config::DataDir;
use crate::db::{self, Database, ProjectRecord, crud};

/// 素材库标识
///
/// 永久库保存归档素材与项目元数据，项目库相互隔离，各自一个数据库文件。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LibraryKey {
    Permanent,
    Project(String),
}

impl LibraryKey {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Permanent => "permanent",
            Self::Project(id) => id,
        }
    }
}

impl FromStr for LibraryKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "permanent" {
            Ok(Self::Permanent)
        } else if s.starts_with("proj_") && s.len() > 5 {
            Ok(Self::Project(s.to_string()))
        } else {
            bail!("无效的素材库标识: {s}")
        }
    }
}

impl fmt::Display for LibraryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 统一管理永久库与各项目库的连接池
///
/// 连接池按需打开并缓存，项目硬删除时关闭并移除对应的池。
pub struct LibraryManager {
    data_dir: DataDir,
    pools: Mutex<HashMap<String, Database>>,
}

/// 一次归档操作的汇总
#[derive(Debug, Default)]
pub struct ArchiveOutcome {
    pub archived: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl LibraryManager {
    pub fn new(data_dir: DataDir) -> Self {
        Self { data_dir, pools: Mutex::new(HashMap::new()) }
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    /// 获取素材库的连接池，必要时打开数据库
    ///
    /// 项目库要求项目元数据存在且未被软删除。
    pub async fn pool(&self, key: &LibraryKey) -> Result<Database> {
        if let LibraryKey::Project(id) = key {
            let permanent = self.permanent().await?;
            if crud::get_project(&permanent, id).await?.is_none() {
                bail!("项目不存在: {id}");
            }
        }
        self.open(key).await
    }

    /// 永久库连接池
    pub async fn permanent(&self) -> Result<Database> {
        self.open(&LibraryKey::Permanent).await
    }

    async fn open(&self, key: &LibraryKey) -> Result<Database> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(key.as_str()) {
            return Ok(pool.clone());
        }
        let filename = match key {
            LibraryKey::Permanent => self.data_dir.permanent_db(),
            LibraryKey::Project(id) => self.data_dir.project_db(id),
        };
        if let Some(parent) = filename.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("创建数据目录失败: {}", parent.display()))?;
        }
        let pool = db::init_db(&filename).await?;
        pools.insert(key.as_str().to_string(), pool.clone());
        Ok(pool)
    }

    // ===== 项目生命周期 =====

    /// 创建项目，ID 形如 `proj_2026_slug_01`
    pub async fn create_project(&self, name: &str) -> Result<ProjectRecord> {
        let name = name.trim();
        if name.is_empty() {
            bail!("项目名称不能为空");
        }

        let permanent = self.permanent().await?;
        let prefix = format!("proj_{}_{}", Utc::now().year(), slugify(name));
        let serial = crud::count_projects_with_prefix(&permanent, &prefix).await? + 1;
        let id = format!("{}_{:02}", prefix, serial);

        let now = Utc::now().timestamp();
        let project = ProjectRecord {
            id: id.clone(),
            name: name.to_string(),
            status: "active".to_string(),
            is_deleted: false,
            image_count: 0,
            video_count: 0,
            created_time: now,
            updated_time: now,
            database_path: Some(self.data_dir.project_db(&id).to_string_lossy().into_owned()),
        };
        crud::insert_project(&permanent, &project).await?;

        // 立即建库，保证后续扫描/搜索不必再区分首次访问
        self.open(&LibraryKey::Project(id.clone())).await?;
        info!("创建项目: {id} ({name})");
        Ok(project)
    }

    pub async fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>> {
        let permanent = self.permanent().await?;
        Ok(crud::get_project(&permanent, id).await?)
    }

    pub async fn list_projects(
        &self,
        status: Option<&str>,
        include_deleted: bool,
    ) -> Result<Vec<ProjectRecord>> {
        let permanent = self.permanent().await?;
        Ok(crud::list_projects(&permanent, status, include_deleted).await?)
    }

    /// 修改项目名称或状态
    pub async fn update_project(
        &self,
        id: &str,
        name: Option<&str>,
        status: Option<&str>,
    ) -> Result<ProjectRecord> {
        let permanent = self.permanent().await?;
        let Some(mut project) = crud::get_project(&permanent, id).await? else {
            bail!("项目不存在: {id}");
        };
        if let Some(name) = name {
            let name = name.trim();
            if name.is_empty() {
                bail!("项目名称不能为空");
            }
            project.name = name.to_string();
        }
        if let Some(status) = status {
            if !matches!(status, "active" | "completed" | "archived") {
                bail!("无效的项目状态: {status}");
            }
            project.status = status.to_string();
        }
        project.updated_time = Utc::now().timestamp();
        crud::update_project(&permanent, &project).await?;
        Ok(project)
    }

    /// 删除项目
    ///
    /// 软删除仅标记元数据，数据库文件保留；硬删除关闭连接池并移除数据库文件。
    pub async fn delete_project(&self, id: &str, hard: bool) -> Result<()> {
        let permanent = self.permanent().await?;
        let Some(mut project) = crud::get_project(&permanent, id).await? else {
            bail!("项目不存在: {id}");
        };

        if !hard {
            project.is_deleted = true;
            project.updated_time = Utc::now().timestamp();
            crud::update_project(&permanent, &project).await?;
            info!("软删除项目: {id}");
            return Ok(());
        }

        if let Some(pool) = self.pools.lock().await.remove(id) {
            pool.close().await;
        }
        crud::delete_project_row(&permanent, id).await?;

        let db_path = self.data_dir.project_db(id);
        for suffix in ["", "-wal", "-shm"] {
            let mut path = db_path.clone().into_os_string();
            path.push(suffix);
            let path = std::path::PathBuf::from(path);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("删除项目数据库文件失败: {} ({e})", path.display());
                }
            }
        }
        info!("硬删除项目: {id}");
        Ok(())
    }

    /// 刷新项目的素材计数
    pub async fn refresh_project_stats(&self, id: &str) -> Result<()> {
        let permanent = self.permanent().await?;
        let Some(mut project) = crud::get_project(&permanent, id).await? else {
            bail!("项目不存在: {id}");
        };
        let pool = self.open(&LibraryKey::Project(id.to_string())).await?;
        project.image_count = crud::image_count(&pool).await?;
        project.video_count = crud::video_count(&pool).await?;
        project.updated_time = Utc::now().timestamp();
        crud::update_project(&permanent, &project).await?;
        Ok(())
    }

    // ===== 归档 =====

    /// 把项目内的若干图片归档到永久库
    ///
    /// 特征向量字节原样复制，不重新向量化。已归档的条目跳过。
    /// 永久库插入成功但项目侧标记失败时，回删永久库副本，保证两侧一致。
    pub async fn archive_images(&self, project_id: &str, ids: &[i64]) -> Result<ArchiveOutcome> {
        let project_pool = self.pool(&LibraryKey::Project(project_id.to_string())).await?;
        let permanent = self.permanent().await?;

        let mut outcome = ArchiveOutcome::default();
        for &id in ids {
            let Some(image) = crud::get_image_by_id(&project_pool, id).await? else {
                warn!("归档跳过，图片不存在: {project_id}/{id}");
                outcome.failed += 1;
                continue;
            };
            if image.archived {
                outcome.skipped += 1;
                continue;
            }

            let copy_id = crud::insert_image_copy(&permanent, &image).await?;
            match crud::set_image_archived(&project_pool, id, copy_id).await {
                Ok(n) if n > 0 => outcome.archived += 1,
                Ok(_) => {
                    // 并发删除等竞态，回收永久库副本
                    crud::delete_image_by_id(&permanent, copy_id).await?;
                    outcome.failed += 1;
                }
                Err(e) => {
                    error!("归档标记失败，回收永久库副本: {project_id}/{id} ({e})");
                    crud::delete_image_by_id(&permanent, copy_id).await?;
                    outcome.failed += 1;
                }
            }
        }
        info!(
            "归档完成: {project_id} 成功 {} 跳过 {} 失败 {}",
            outcome.archived, outcome.skipped, outcome.failed
        );
        Ok(outcome)
    }

    /// 项目内已归档的图片列表
    pub async fn archived_images(&self, project_id: &str) -> Result<Vec<crate::db::ImageRecord>> {
        let pool = self.pool(&LibraryKey::Project(project_id.to_string())).await?;
        Ok(crud::archived_images(&pool).await?)
    }

    /// 取消归档：仅清除项目侧的归档标记与回引，永久库副本保留
    pub async fn unarchive_images(&self, project_id: &str, ids: &[i64]) -> Result<usize> {
        let project_pool = self.pool(&LibraryKey::Project(project_id.to_string())).await?;

        let mut count = 0;
        for &id in ids {
            if crud::clear_image_archived(&project_pool, id).await? > 0 {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// 项目名转为 ID 片段：保留字母数字，其余折叠为下划线
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_sep = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_sep = false;
        } else if !last_sep {
            slug.push('_');
            last_sep = true;
        }
    }
    let slug = slug.trim_end_matches('_').to_string();
    if slug.is_empty() { "project".to_string() } else { slug }
}
