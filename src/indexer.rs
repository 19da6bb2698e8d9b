use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use log::{error, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::SearchCaches;
use crate::db::{Database, crud};
use crate::embed::Embedder;
use crate::library::{LibraryKey, LibraryManager};
use crate::matcher;
use crate::phash;

/// 重复决策的默认等待时长，超时按跳过处理
const DECISION_TIMEOUT: Duration = Duration::from_secs(300);

/// 终态任务的保留时长，超过后被回收
const TASK_RETENTION: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    WaitingDuplicate,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::WaitingDuplicate => "waiting_duplicate",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// 遇到感知哈希重复时的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateStrategy {
    Ask,
    Skip,
    Overwrite,
}

impl FromStr for DuplicateStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ask" => Ok(Self::Ask),
            "skip" => Ok(Self::Skip),
            "overwrite" => Ok(Self::Overwrite),
            _ => bail!("duplicate_strategy 仅支持 ask/skip/overwrite"),
        }
    }
}

/// 针对单个重复文件的决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateAction {
    Skip,
    Overwrite,
}

impl FromStr for DuplicateAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "skip" => Ok(Self::Skip),
            "overwrite" => Ok(Self::Overwrite),
            _ => bail!("action 仅支持 skip/overwrite"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Decision {
    action: DuplicateAction,
    apply_to_all: bool,
}

/// 已处理的重复文件记录
#[derive(Debug, Clone)]
pub struct DuplicateRecord {
    pub path: String,
    pub existing_path: String,
    pub action: String,
}

/// 索引失败的文件记录
#[derive(Debug, Clone)]
pub struct FailedRecord {
    pub path: String,
    pub error: String,
}

/// 等待前端决策的重复文件详情
#[derive(Debug, Clone)]
pub struct PendingDuplicate {
    pub path: String,
    pub file_size: Option<i64>,
    pub modify_time: i64,
    pub existing_id: i64,
    pub existing_path: String,
    pub existing_file_size: Option<i64>,
    pub existing_modify_time: i64,
}

struct TaskState {
    status: TaskStatus,
    total: usize,
    processed: usize,
    success: usize,
    failed: Vec<FailedRecord>,
    duplicates: Vec<DuplicateRecord>,
    current_file: Option<String>,
    pending_duplicate: Option<PendingDuplicate>,
    strategy: DuplicateStrategy,
    cancelled: bool,
    error: Option<String>,
    started_at: Instant,
    finished_at: Option<Instant>,
}

struct TaskHandle {
    state: Mutex<TaskState>,
    decision_tx: mpsc::Sender<Decision>,
}

/// 任务状态快照，供状态查询接口使用
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub status: TaskStatus,
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: Vec<FailedRecord>,
    pub duplicates: Vec<DuplicateRecord>,
    pub current_file: Option<String>,
    pub pending_duplicate: Option<PendingDuplicate>,
    pub error: Option<String>,
    pub remain_seconds: u64,
}

/// 批量索引器：按显式文件列表入库，支持重复检测与人工决策
///
/// 每个任务一个后台 worker，状态只由 worker 写入，
/// 决策通过通道送达正在等待的 worker。
pub struct BatchIndexer {
    libraries: Arc<LibraryManager>,
    embedder: Arc<dyn Embedder>,
    caches: Arc<SearchCaches>,
    tasks: Mutex<HashMap<Uuid, Arc<TaskHandle>>>,
    decision_timeout: Duration,
    image_suffixes: Vec<String>,
    video_suffixes: Vec<String>,
    frame_interval: u32,
    checksum: bool,
}

impl BatchIndexer {
    pub fn new(
        libraries: Arc<LibraryManager>,
        embedder: Arc<dyn Embedder>,
        caches: Arc<SearchCaches>,
        image_suffix: &str,
        video_suffix: &str,
        frame_interval: u32,
        checksum: bool,
    ) -> Self {
        Self {
            libraries,
            embedder,
            caches,
            tasks: Mutex::new(HashMap::new()),
            decision_timeout: DECISION_TIMEOUT,
            image_suffixes: split_suffixes(image_suffix),
            video_suffixes: split_suffixes(video_suffix),
            frame_interval: frame_interval.max(1),
            checksum,
        }
    }

    /// 调整重复决策的等待时长
    pub fn with_decision_timeout(mut self, timeout: Duration) -> Self {
        self.decision_timeout = timeout;
        self
    }

    /// 提交一个批量索引任务，返回任务 ID
    pub fn submit(
        self: &Arc<Self>,
        target: LibraryKey,
        files: Vec<String>,
        strategy: DuplicateStrategy,
    ) -> Result<Uuid> {
        if files.is_empty() {
            bail!("files 必须是非空数组");
        }
        self.collect_expired();

        let id = Uuid::new_v4();
        let (decision_tx, decision_rx) = mpsc::channel(1);
        let handle = Arc::new(TaskHandle {
            state: Mutex::new(TaskState {
                status: TaskStatus::Running,
                total: files.len(),
                processed: 0,
                success: 0,
                failed: vec![],
                duplicates: vec![],
                current_file: None,
                pending_duplicate: None,
                strategy,
                cancelled: false,
                error: None,
                started_at: Instant::now(),
                finished_at: None,
            }),
            decision_tx,
        });
        self.tasks.lock().unwrap().insert(id, handle.clone());

        info!("批量索引任务 {id}: {} 个文件, 目标库 {target}", files.len());
        let indexer = self.clone();
        tokio::spawn(async move {
            indexer.run_task(id, handle, target, files, decision_rx).await;
        });
        Ok(id)
    }

    /// 查询任务状态
    pub fn snapshot(&self, id: &Uuid) -> Option<TaskSnapshot> {
        self.collect_expired();
        let handle = self.tasks.lock().unwrap().get(id)?.clone();
        let state = handle.state.lock().unwrap();

        let remain_seconds = if !state.status.is_terminal() && state.processed > 0 {
            let elapsed = state.started_at.elapsed().as_secs_f64();
            let per_file = elapsed / state.processed as f64;
            (per_file * (state.total - state.processed) as f64) as u64
        } else {
            0
        };
        Some(TaskSnapshot {
            id: *id,
            status: state.status,
            total: state.total,
            processed: state.processed,
            success: state.success,
            failed: state.failed.clone(),
            duplicates: state.duplicates.clone(),
            current_file: state.current_file.clone(),
            pending_duplicate: state.pending_duplicate.clone(),
            error: state.error.clone(),
            remain_seconds,
        })
    }

    /// 提交重复决策，唤醒正在等待的 worker
    pub fn decide(&self, id: &Uuid, action: DuplicateAction, apply_to_all: bool) -> Result<()> {
        let handle = self
            .tasks
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("任务不存在: {id}"))?;
        {
            let state = handle.state.lock().unwrap();
            if state.status != TaskStatus::WaitingDuplicate {
                bail!("任务当前没有待决策的重复文件");
            }
        }
        handle
            .decision_tx
            .try_send(Decision { action, apply_to_all })
            .map_err(|_| anyhow!("决策投递失败，任务可能已恢复运行"))?;
        Ok(())
    }

    /// 请求取消任务，worker 在文件之间检查该标志
    pub fn cancel(&self, id: &Uuid) -> Result<()> {
        let handle = self
            .tasks
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("任务不存在: {id}"))?;
        let mut state = handle.state.lock().unwrap();
        if state.status.is_terminal() {
            bail!("任务已结束");
        }
        state.cancelled = true;
        Ok(())
    }

    /// 回收超过保留期的终态任务
    fn collect_expired(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.retain(|_, handle| {
            let state = handle.state.lock().unwrap();
            match (state.status.is_terminal(), state.finished_at) {
                (true, Some(at)) => at.elapsed() < TASK_RETENTION,
                _ => true,
            }
        });
    }

    async fn run_task(
        &self,
        id: Uuid,
        handle: Arc<TaskHandle>,
        target: LibraryKey,
        files: Vec<String>,
        mut decision_rx: mpsc::Receiver<Decision>,
    ) {
        let pool = match self.libraries.pool(&target).await {
            Ok(pool) => pool,
            Err(e) => {
                let mut state = handle.state.lock().unwrap();
                state.status = TaskStatus::Failed;
                state.error = Some(format!("{e:#}"));
                state.finished_at = Some(Instant::now());
                return;
            }
        };

        for path in files {
            {
                let mut state = handle.state.lock().unwrap();
                if state.cancelled {
                    state.status = TaskStatus::Cancelled;
                    state.finished_at = Some(Instant::now());
                    info!("任务 {id} 被取消 ({}/{})", state.processed, state.total);
                    return;
                }
                state.current_file = Some(path.clone());
                state.processed += 1;
            }

            if let Err(e) = self.index_one(&handle, &pool, &path, &mut decision_rx).await {
                warn!("索引文件失败: {path} ({e:#})");
                handle
                    .state
                    .lock()
                    .unwrap()
                    .failed
                    .push(FailedRecord { path, error: format!("{e:#}") });
            }
        }

        {
            let mut state = handle.state.lock().unwrap();
            state.status = TaskStatus::Completed;
            state.current_file = None;
            state.finished_at = Some(Instant::now());
            info!(
                "任务 {id} 完成: 成功 {} 失败 {} 重复 {}",
                state.success,
                state.failed.len(),
                state.duplicates.len()
            );
        }

        self.caches.clear_all();
        if let LibraryKey::Project(project_id) = &target {
            if let Err(e) = self.libraries.refresh_project_stats(project_id).await {
                error!("更新项目统计失败: {project_id} ({e:#})");
            }
        }
    }

    async fn index_one(
        &self,
        handle: &TaskHandle,
        pool: &Database,
        path: &str,
        decision_rx: &mut mpsc::Receiver<Decision>,
    ) -> Result<()> {
        let file = Path::new(path);
        if !file.exists() {
            bail!("文件不存在");
        }
        let ext = file
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        let metadata = tokio::fs::metadata(file).await?;
        let modify_time = metadata
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let checksum = if self.checksum {
            Some(blake3::hash(&tokio::fs::read(file).await?).as_bytes().to_vec())
        } else {
            None
        };

        if self.image_suffixes.contains(&ext) {
            self.index_image(handle, pool, path, modify_time, checksum, decision_rx).await
        } else if self.video_suffixes.contains(&ext) {
            let frames = self.embedder.embed_video(file, self.frame_interval).await?;
            crud::replace_video(pool, path, modify_time, checksum.as_deref(), &frames).await?;
            handle.state.lock().unwrap().success += 1;
            Ok(())
        } else {
            bail!("不支持的文件类型: {ext}")
        }
    }

    async fn index_image(
        &self,
        handle: &TaskHandle,
        pool: &Database,
        path: &str,
        modify_time: i64,
        checksum: Option<Vec<u8>>,
        decision_rx: &mut mpsc::Receiver<Decision>,
    ) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        let props = phash::d_hash_bytes(&bytes)?;

        if let Some(existing) = crud::find_image_by_phash(pool, &props.phash).await? {
            let strategy = handle.state.lock().unwrap().strategy;
            let (action, decided_by_user) = match strategy {
                DuplicateStrategy::Skip => (DuplicateAction::Skip, false),
                DuplicateStrategy::Overwrite => (DuplicateAction::Overwrite, false),
                DuplicateStrategy::Ask => {
                    let pending = PendingDuplicate {
                        path: path.to_string(),
                        file_size: Some(bytes.len() as i64),
                        modify_time,
                        existing_id: existing.id,
                        existing_path: existing.path.clone(),
                        existing_file_size: existing.file_size,
                        existing_modify_time: existing.modify_time,
                    };
                    self.wait_for_decision(handle, pending, decision_rx).await
                }
            };

            let action_label = match (action, decided_by_user) {
                (DuplicateAction::Skip, true) => "用户跳过",
                (DuplicateAction::Skip, false) => "已跳过",
                (DuplicateAction::Overwrite, true) => "用户覆盖",
                (DuplicateAction::Overwrite, false) => "已覆盖",
            };
            handle.state.lock().unwrap().duplicates.push(DuplicateRecord {
                path: path.to_string(),
                existing_path: existing.path.clone(),
                action: action_label.to_string(),
            });

            match action {
                DuplicateAction::Skip => return Ok(()),
                DuplicateAction::Overwrite => {
                    crud::delete_image_by_id(pool, existing.id).await?;
                }
            }
        }

        let features = self.embedder.embed_image(&bytes).await?;
        crud::upsert_image(
            pool,
            path,
            modify_time,
            checksum.as_deref(),
            &matcher::features_to_blob(&features),
            Some(&props.phash),
            Some(props.width as i64),
            Some(props.height as i64),
            Some(bytes.len() as i64),
        )
        .await?;
        handle.state.lock().unwrap().success += 1;
        Ok(())
    }

    /// ask 模式下挂起等待决策，超时按自动跳过处理
    ///
    /// 返回采取的动作，以及它是否来自用户（超时兜底不算用户决策）。
    async fn wait_for_decision(
        &self,
        handle: &TaskHandle,
        pending: PendingDuplicate,
        decision_rx: &mut mpsc::Receiver<Decision>,
    ) -> (DuplicateAction, bool) {
        // 先清掉可能残留的过期决策
        while decision_rx.try_recv().is_ok() {}

        {
            let mut state = handle.state.lock().unwrap();
            state.pending_duplicate = Some(pending);
            state.status = TaskStatus::WaitingDuplicate;
        }

        let (decision, from_user) =
            match tokio::time::timeout(self.decision_timeout, decision_rx.recv()).await {
                Ok(Some(decision)) => (decision, true),
                _ => {
                    info!("重复决策等待超时，按跳过处理");
                    (Decision { action: DuplicateAction::Skip, apply_to_all: false }, false)
                }
            };

        let mut state = handle.state.lock().unwrap();
        state.pending_duplicate = None;
        state.status = TaskStatus::Running;
        if decision.apply_to_all {
            state.strategy = match decision.action {
                DuplicateAction::Skip => DuplicateStrategy::Skip,
                DuplicateAction::Overwrite => DuplicateStrategy::Overwrite,
            };
        }
        (decision.action, from_user)
    }
}

fn split_suffixes(list: &str) -> Vec<String> {
    list.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect()
}
