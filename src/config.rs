use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveTime;
use clap::Parser;
use directories::ProjectDirs;

use crate::cli::SubCommand;

static DATA_DIR: LazyLock<DataDir> = LazyLock::new(|| {
    let proj_dirs =
        ProjectDirs::from("", "", "mediasearch").expect("failed to get project dir");
    DataDir { path: proj_dirs.data_dir().to_path_buf() }
});

fn default_data_dir() -> &'static str {
    DATA_DIR.path().to_str().unwrap()
}

#[derive(Parser, Debug, Clone)]
#[command(name = "mediasearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，存放各素材库数据库与临时文件
    #[arg(short, long, default_value = default_data_dir())]
    pub data_dir: DataDir,
}

/// 扫描相关选项
#[derive(Parser, Debug, Clone)]
pub struct ScanOptions {
    /// 扫描的根目录，可指定多个
    #[arg(long = "path", value_name = "DIR")]
    pub roots: Vec<PathBuf>,
    /// 跳过扫描的目录，可指定多个
    #[arg(long = "skip", value_name = "DIR")]
    pub skip_roots: Vec<PathBuf>,
    /// 路径包含这些子串时跳过（忽略大小写）
    #[arg(long, value_delimiter = ',', default_value = "thumb,avatar,icon,cache")]
    pub ignore: Vec<String>,
    /// 图片扩展名允许列表，逗号分隔
    #[arg(long, default_value = "jpg,jpeg,png,gif,webp")]
    pub image_suffix: String,
    /// 视频扩展名允许列表，逗号分隔
    #[arg(long, default_value = "mp4,flv,mov,mkv")]
    pub video_suffix: String,
    /// 视频每隔多少秒采一帧
    #[arg(long, value_name = "SECS", default_value_t = 2)]
    pub frame_interval: u32,
    /// 每处理多少个文件保存一次断点
    #[arg(long, value_name = "N", default_value_t = 100)]
    pub auto_save_interval: usize,
    /// 使用内容校验和代替修改时间作为变更指纹
    #[arg(long)]
    pub checksum: bool,
    /// 启用自动扫描调度
    #[arg(long)]
    pub auto_scan: bool,
    /// 自动扫描窗口开始时间
    #[arg(long, value_name = "HH:MM", default_value = "22:30", value_parser = parse_time)]
    pub auto_scan_start: NaiveTime,
    /// 自动扫描窗口结束时间（不含）
    #[arg(long, value_name = "HH:MM", default_value = "08:00", value_parser = parse_time)]
    pub auto_scan_end: NaiveTime,
}

/// 搜索相关选项
#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 正向阈值，百分制，低于该分数的结果不展示
    #[arg(long, value_name = "N", default_value_t = 10, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub positive_threshold: u32,
    /// 反向阈值，百分制，高于该分数的结果被过滤
    #[arg(long, value_name = "N", default_value_t = 10, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub negative_threshold: u32,
    /// 以图搜索阈值，百分制
    #[arg(long, value_name = "N", default_value_t = 85, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub image_threshold: u32,
    /// 最大结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 150)]
    pub max_results: usize,
    /// 每种查询形态的缓存容量
    #[arg(long, value_name = "N", default_value_t = 64)]
    pub cache_size: usize,
}

/// 向量化服务选项
#[derive(Parser, Debug, Clone)]
pub struct EmbedOptions {
    /// 向量化服务地址
    #[arg(long, value_name = "URL", default_value = "http://127.0.0.1:8060")]
    pub embed_url: String,
    /// 向量维度，部署期内必须固定
    #[arg(long, value_name = "DIM", default_value_t = 512)]
    pub embed_dim: usize,
}

/// 数据目录，集中管理各类文件的存放路径
#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 永久库数据库路径
    pub fn permanent_db(&self) -> PathBuf {
        self.path.join("permanent.db")
    }

    /// 项目库数据库路径
    pub fn project_db(&self, project_id: &str) -> PathBuf {
        self.path.join(format!("{}.db", project_id))
    }

    /// 扫描断点文件路径
    pub fn checkpoint(&self) -> PathBuf {
        self.path.join("checkpoint.bin")
    }

    /// 上传临时目录
    pub fn upload_dir(&self) -> PathBuf {
        self.path.join("upload")
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| format!("无效的时间: {s} ({e})"))
}
