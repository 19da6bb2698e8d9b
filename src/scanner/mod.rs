use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{Local, NaiveTime};
use log::{debug, error, info, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::cache::SearchCaches;
use crate::config::ScanOptions;
use crate::db::{Database, crud};
use crate::embed::Embedder;
use crate::library::{LibraryKey, LibraryManager};
use crate::matcher;
use crate::phash;

pub mod checkpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetKind {
    Image,
    Video,
}

/// 扫描配置，由命令行选项构建
pub struct ScanConfig {
    roots: Vec<PathBuf>,
    skip_roots: Vec<PathBuf>,
    ignore: Vec<String>,
    image_re: Regex,
    video_re: Regex,
    pub frame_interval: u32,
    pub auto_save_interval: usize,
    pub checksum: bool,
    pub auto_scan: bool,
    pub auto_scan_start: NaiveTime,
    pub auto_scan_end: NaiveTime,
}

impl ScanConfig {
    pub fn new(opts: &ScanOptions) -> Result<Self> {
        Ok(Self {
            roots: opts.roots.clone(),
            skip_roots: opts.skip_roots.clone(),
            ignore: opts.ignore.iter().map(|s| s.to_lowercase()).collect(),
            image_re: suffix_regex(&opts.image_suffix)?,
            video_re: suffix_regex(&opts.video_suffix)?,
            frame_interval: opts.frame_interval.max(1),
            auto_save_interval: opts.auto_save_interval.max(1),
            checksum: opts.checksum,
            auto_scan: opts.auto_scan,
            auto_scan_start: opts.auto_scan_start,
            auto_scan_end: opts.auto_scan_end,
        })
    }

    fn kind_of(&self, path: &Path) -> Option<AssetKind> {
        let ext = path.extension()?.to_str()?;
        if self.image_re.is_match(ext) {
            Some(AssetKind::Image)
        } else if self.video_re.is_match(ext) {
            Some(AssetKind::Video)
        } else {
            None
        }
    }

    /// 路径是否属于本轮扫描范围，roots 为本轮实际使用的根目录
    fn eligible(&self, path: &Path, roots: &[PathBuf]) -> bool {
        if self.kind_of(path).is_none() {
            return false;
        }
        if !roots.iter().any(|root| path.starts_with(root)) {
            return false;
        }
        if self.skip_roots.iter().any(|skip| path.starts_with(skip)) {
            return false;
        }
        let lower = path.to_string_lossy().to_lowercase();
        !self.ignore.iter().any(|kw| lower.contains(kw))
    }
}

fn suffix_regex(list: &str) -> Result<Regex> {
    let alternatives = list
        .split(',')
        .map(|s| regex::escape(s.trim()))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)^({alternatives})$")).context("扩展名列表无法编译为正则")
}

/// 扫描进度计数
#[derive(Debug, Default, Clone)]
pub struct ScanProgress {
    pub total: usize,
    pub processed: usize,
    pub new_images: usize,
    pub new_videos: usize,
    pub deleted: usize,
}

/// 对外暴露的扫描状态快照
#[derive(Debug, Clone)]
pub struct ScanStatus {
    pub scanning: bool,
    pub total: usize,
    pub processed: usize,
    /// 0.0 到 1.0
    pub progress: f64,
    pub new_images: usize,
    pub new_videos: usize,
    pub deleted: usize,
    /// 预计剩余秒数
    pub remain_seconds: u64,
}

/// 扫描器：枚举素材、变更检测、向量化入库与断点续扫
///
/// 全局同一时刻只允许一个扫描在运行，由原子标志保证。
pub struct Scanner {
    config: ScanConfig,
    libraries: Arc<LibraryManager>,
    embedder: Arc<dyn Embedder>,
    caches: Arc<SearchCaches>,
    scanning: AtomicBool,
    started_at: std::sync::Mutex<Option<Instant>>,
    progress: std::sync::Mutex<ScanProgress>,
    window_fired: AtomicBool,
}

impl Scanner {
    pub fn new(
        config: ScanConfig,
        libraries: Arc<LibraryManager>,
        embedder: Arc<dyn Embedder>,
        caches: Arc<SearchCaches>,
    ) -> Self {
        Self {
            config,
            libraries,
            embedder,
            caches,
            scanning: AtomicBool::new(false),
            started_at: std::sync::Mutex::new(None),
            progress: std::sync::Mutex::new(ScanProgress::default()),
            window_fired: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// 占用扫描槽位，已有扫描在运行时失败
    fn try_begin(&self) -> bool {
        self.scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// 在后台启动一次扫描，返回是否成功启动
    ///
    /// roots 为 None 时使用配置的扫描根目录，项目库扫描可传入自定义根目录。
    pub fn spawn_scan(
        self: &Arc<Self>,
        auto: bool,
        target: LibraryKey,
        roots: Option<Vec<PathBuf>>,
    ) -> bool {
        if !self.try_begin() {
            return false;
        }
        let scanner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = scanner.run_claimed(auto, &target, roots).await {
                error!("扫描失败: {e:#}");
            }
        });
        true
    }

    /// 前台执行一次手动扫描，已有扫描在运行时返回 Ok(false)
    pub async fn scan_once(
        &self,
        target: &LibraryKey,
        roots: Option<Vec<PathBuf>>,
    ) -> Result<bool> {
        if !self.try_begin() {
            return Ok(false);
        }
        self.run_claimed(false, target, roots).await?;
        Ok(true)
    }

    pub fn status(&self) -> ScanStatus {
        let progress = self.progress.lock().unwrap().clone();
        let scanning = self.is_scanning();
        let ratio = if progress.total == 0 {
            0.0
        } else {
            progress.processed as f64 / progress.total as f64
        };
        let remain_seconds = if scanning && progress.processed > 0 {
            let elapsed = self
                .started_at
                .lock()
                .unwrap()
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0);
            let per_asset = elapsed / progress.processed as f64;
            (per_asset * (progress.total - progress.processed) as f64) as u64
        } else {
            0
        };
        ScanStatus {
            scanning,
            total: progress.total,
            processed: progress.processed,
            progress: ratio,
            new_images: progress.new_images,
            new_videos: progress.new_videos,
            deleted: progress.deleted,
            remain_seconds,
        }
    }

    /// 自动扫描调度：每 5 秒检查一次时间窗口
    ///
    /// 同一窗口内已完成的扫描不会被反复触发，窗口退出后复位。
    pub async fn run_auto_loop(self: Arc<Self>) {
        if !self.config.auto_scan {
            return;
        }
        info!(
            "自动扫描已启用: {} - {}",
            self.config.auto_scan_start, self.config.auto_scan_end
        );
        let mut tick = tokio::time::interval(Duration::from_secs(5));
        loop {
            tick.tick().await;
            let now = Local::now().time();
            if !in_auto_window(now, self.config.auto_scan_start, self.config.auto_scan_end) {
                self.window_fired.store(false, Ordering::SeqCst);
                continue;
            }
            if self.window_fired.swap(true, Ordering::SeqCst) {
                continue;
            }
            if !self.try_begin() {
                // 手动扫描占用中，下个周期再试
                self.window_fired.store(false, Ordering::SeqCst);
                continue;
            }
            info!("进入自动扫描时间段，开始扫描");
            if let Err(e) = self.run_claimed(true, &LibraryKey::Permanent, None).await {
                error!("自动扫描失败: {e:#}");
            }
        }
    }

    async fn run_claimed(
        &self,
        auto: bool,
        target: &LibraryKey,
        roots: Option<Vec<PathBuf>>,
    ) -> Result<()> {
        *self.started_at.lock().unwrap() = Some(Instant::now());
        let roots = roots.unwrap_or_else(|| self.config.roots.clone());
        let result = self.scan_inner(auto, target, &roots).await;
        self.scanning.store(false, Ordering::SeqCst);
        result
    }

    async fn scan_inner(&self, auto: bool, target: &LibraryKey, roots: &[PathBuf]) -> Result<()> {
        let pool = self.libraries.pool(target).await?;
        let checkpoint_path = self.libraries.data_dir().checkpoint();

        let loaded = checkpoint::load(&checkpoint_path);
        let (mut pending, fresh) = match loaded {
            // 断点只对同一个目标库有效，跨库恢复会把路径写错库并漏掉删除清理
            Some((library, saved)) if library == target.as_str() => {
                // 断点恢复时丢弃已不在扫描范围内的路径
                let before = saved.len();
                let pending: BTreeSet<String> = saved
                    .into_iter()
                    .filter(|p| {
                        let path = Path::new(p);
                        path.exists() && self.config.eligible(path, roots)
                    })
                    .collect();
                info!(
                    "从断点恢复扫描: 待处理 {} 个（丢弃 {} 个失效路径）",
                    pending.len(),
                    before - pending.len()
                );
                (pending, false)
            }
            loaded => {
                if let Some((library, _)) = loaded {
                    warn!("断点属于素材库 {library}，本次目标为 {target}，丢弃断点");
                }
                let pending = self.enumerate(roots);
                info!("开始全量扫描: 共 {} 个素材", pending.len());
                // 先落盘完整的枚举结果，中途崩溃可以从这里续扫
                checkpoint::save(&checkpoint_path, target.as_str(), &pending)?;
                (pending, true)
            }
        };

        *self.progress.lock().unwrap() =
            ScanProgress { total: pending.len(), ..Default::default() };

        // 删除清理只在全量扫描时做，断点恢复的集合不完整
        if fresh {
            let deleted = self.sweep_deleted(&pool, &pending).await?;
            self.progress.lock().unwrap().deleted = deleted;
        }

        let todo: Vec<String> = pending.iter().cloned().collect();
        let mut since_save = 0usize;
        for entry in todo {
            if auto
                && !in_auto_window(
                    Local::now().time(),
                    self.config.auto_scan_start,
                    self.config.auto_scan_end,
                )
            {
                info!("超出自动扫描时间段，保存断点后提前结束");
                checkpoint::save(&checkpoint_path, target.as_str(), &pending)?;
                return Ok(());
            }

            if let Err(e) = self.process_one(&pool, &entry).await {
                warn!("处理素材失败，跳过: {entry} ({e:#})");
            }
            pending.remove(&entry);
            self.progress.lock().unwrap().processed += 1;

            since_save += 1;
            if since_save >= self.config.auto_save_interval {
                checkpoint::save(&checkpoint_path, target.as_str(), &pending)?;
                since_save = 0;
            }
        }

        checkpoint::remove(&checkpoint_path);
        self.caches.clear_all();
        if let LibraryKey::Project(id) = target {
            self.libraries.refresh_project_stats(id).await?;
        }

        let progress = self.progress.lock().unwrap().clone();
        info!(
            "扫描完成: 处理 {} 新图片 {} 新视频 {} 清理 {}",
            progress.processed, progress.new_images, progress.new_videos, progress.deleted
        );
        Ok(())
    }

    /// 遍历扫描根目录，收集范围内的素材路径
    fn enumerate(&self, roots: &[PathBuf]) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        for root in roots {
            for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                if self.config.eligible(entry.path(), roots) {
                    set.insert(entry.path().to_string_lossy().into_owned());
                }
            }
        }
        set
    }

    /// 清理数据库中文件已不存在的记录
    async fn sweep_deleted(&self, pool: &Database, present: &BTreeSet<String>) -> Result<usize> {
        let mut deleted = 0;
        for path in crud::all_image_paths(pool).await? {
            if !present.contains(&path) {
                info!("清理已删除的图片: {path}");
                crud::delete_image_by_path(pool, &path).await?;
                deleted += 1;
            }
        }
        for path in crud::all_video_paths(pool).await? {
            if !present.contains(&path) {
                info!("清理已删除的视频: {path}");
                crud::delete_video_by_path(pool, &path).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// 处理单个素材：指纹比对后决定是否重新向量化
    ///
    /// 单个素材的写入在一个事务/语句内提交，崩溃后重扫可安全跳过。
    async fn process_one(&self, pool: &Database, entry: &str) -> Result<()> {
        let path = Path::new(entry);
        let metadata = tokio::fs::metadata(path).await?;
        let modify_time = metadata
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let kind = self.config.kind_of(path).context("不支持的扩展名")?;
        let checksum = if self.config.checksum {
            Some(file_checksum(path).await?)
        } else {
            None
        };

        let stored = match kind {
            AssetKind::Image => crud::get_image_fingerprint(pool, entry).await?,
            AssetKind::Video => crud::get_video_fingerprint(pool, entry).await?,
        };
        if let Some((stored_mtime, stored_checksum)) = stored {
            // 两侧都有校验和时以校验和为准，否则比较修改时间
            let unchanged = match (&checksum, &stored_checksum) {
                (Some(new), Some(old)) => new == old,
                _ => stored_mtime == modify_time,
            };
            if unchanged {
                debug!("指纹一致，跳过: {entry}");
                return Ok(());
            }
        }

        match kind {
            AssetKind::Image => {
                let bytes = tokio::fs::read(path).await?;
                let props = phash::d_hash_bytes(&bytes)?;
                let features = self.embedder.embed_image(&bytes).await?;
                crud::upsert_image(
                    pool,
                    entry,
                    modify_time,
                    checksum.as_deref(),
                    &matcher::features_to_blob(&features),
                    Some(&props.phash),
                    Some(props.width as i64),
                    Some(props.height as i64),
                    Some(metadata.len() as i64),
                )
                .await?;
                self.progress.lock().unwrap().new_images += 1;
                debug!("图片入库: {entry}");
            }
            AssetKind::Video => {
                let frames = self.embedder.embed_video(path, self.config.frame_interval).await?;
                crud::replace_video(pool, entry, modify_time, checksum.as_deref(), &frames)
                    .await?;
                self.progress.lock().unwrap().new_videos += 1;
                debug!("视频入库: {entry} ({} 帧)", frames.len());
            }
        }
        Ok(())
    }
}

/// 当前时刻是否在自动扫描时间窗口内
///
/// 窗口允许跨过零点（如 22:30 - 08:00），结束时刻不含在窗口内。
pub fn in_auto_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start > end {
        now >= start || now < end
    } else {
        start <= now && now < end
    }
}

/// 文件内容的 blake3 校验和
async fn file_checksum(path: &Path) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path).await?;
    Ok(blake3::hash(&bytes).as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn auto_window_crossing_midnight() {
        let start = time(22, 30);
        let end = time(8, 0);
        assert!(in_auto_window(time(23, 0), start, end));
        assert!(in_auto_window(time(3, 0), start, end));
        assert!(in_auto_window(time(22, 30), start, end));
        assert!(!in_auto_window(time(9, 0), start, end));
        assert!(!in_auto_window(time(8, 0), start, end));
        assert!(!in_auto_window(time(12, 0), start, end));
    }

    #[test]
    fn auto_window_same_day() {
        let start = time(9, 0);
        let end = time(17, 0);
        assert!(in_auto_window(time(12, 0), start, end));
        assert!(in_auto_window(time(9, 0), start, end));
        assert!(!in_auto_window(time(17, 0), start, end));
        assert!(!in_auto_window(time(8, 59), start, end));
        assert!(!in_auto_window(time(23, 0), start, end));
    }

    fn config_with(args: &[&str]) -> ScanConfig {
        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            scan: ScanOptions,
        }
        let wrapper = Wrapper::parse_from(std::iter::once("test").chain(args.iter().copied()));
        ScanConfig::new(&wrapper.scan).unwrap()
    }

    #[test]
    fn eligibility_honors_suffix_and_ignore() {
        let config = config_with(&["--path", "/media"]);
        assert_eq!(config.kind_of(Path::new("/media/a.JPG")), Some(AssetKind::Image));
        assert_eq!(config.kind_of(Path::new("/media/b.mp4")), Some(AssetKind::Video));
        assert_eq!(config.kind_of(Path::new("/media/c.txt")), None);

        let roots = config.roots.clone();
        assert!(config.eligible(Path::new("/media/photos/a.jpg"), &roots));
        assert!(!config.eligible(Path::new("/other/a.jpg"), &roots));
        assert!(!config.eligible(Path::new("/media/photos/Thumbnail/a.jpg"), &roots));
        assert!(!config.eligible(Path::new("/media/.cache/a.jpg"), &roots));
    }

    #[test]
    fn skip_roots_excluded() {
        let config = config_with(&["--path", "/media", "--skip", "/media/raw"]);
        let roots = config.roots.clone();
        assert!(config.eligible(Path::new("/media/a.png"), &roots));
        assert!(!config.eligible(Path::new("/media/raw/a.png"), &roots));
    }
}
