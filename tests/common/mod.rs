#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;

use mediasearch::cache::SearchCaches;
use mediasearch::config::DataDir;
use mediasearch::embed::{Embedder, FrameEmbedding};
use mediasearch::library::LibraryManager;

pub const DIM: usize = 8;

/// 确定性的向量化桩：向量由输入内容哈希决定，同时统计调用次数
///
/// 视频不读取文件内容，按固定时长和采样间隔生成帧。
pub struct MockEmbedder {
    pub image_calls: AtomicUsize,
    pub text_calls: AtomicUsize,
    pub video_calls: AtomicUsize,
    /// 模拟的视频时长（秒）
    pub video_duration: i64,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            image_calls: AtomicUsize::new(0),
            text_calls: AtomicUsize::new(0),
            video_calls: AtomicUsize::new(0),
            video_duration: 10,
        }
    }

    /// 由任意字节串生成确定性的归一化向量
    pub fn feature_for(seed: &[u8]) -> Vec<f32> {
        let hash = blake3::hash(seed);
        let mut feature: Vec<f32> =
            hash.as_bytes()[..DIM].iter().map(|b| *b as f32 + 1.0).collect();
        let norm = feature.iter().map(|v| v * v).sum::<f32>().sqrt();
        for v in &mut feature {
            *v /= norm;
        }
        feature
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::feature_for(bytes))
    }

    async fn embed_text(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if text.is_empty() {
            return Ok(None);
        }
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Self::feature_for(text.as_bytes())))
    }

    async fn embed_video(&self, path: &Path, frame_interval: u32) -> Result<Vec<FrameEmbedding>> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        let mut frames = vec![];
        let mut t = 0i64;
        while t < self.video_duration {
            let seed = format!("{}#{t}", path.display());
            frames.push(FrameEmbedding { frame_time: t, features: Self::feature_for(seed.as_bytes()) });
            t += frame_interval as i64;
        }
        Ok(frames)
    }

    fn dim(&self) -> usize {
        DIM
    }
}

/// 测试环境：独立数据目录 + 库管理 + 缓存 + 向量化桩
pub struct TestEnv {
    pub dir: TempDir,
    pub libraries: Arc<LibraryManager>,
    pub caches: Arc<SearchCaches>,
    pub embedder: Arc<MockEmbedder>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let data_dir = DataDir::new(dir.path().join("data"));
        std::fs::create_dir_all(data_dir.path()).unwrap();
        Self {
            dir,
            libraries: Arc::new(LibraryManager::new(data_dir)),
            caches: Arc::new(SearchCaches::new(16)),
            embedder: Arc::new(MockEmbedder::new()),
        }
    }

    pub fn data_dir(&self) -> DataDir {
        self.libraries.data_dir().clone()
    }
}

/// 生成一张纯色 PNG 图片的字节
pub fn png_bytes(r: u8, g: u8, b: u8) -> Vec<u8> {
    let img = RgbImage::from_pixel(16, 16, Rgb([r, g, b]));
    let mut buf = Cursor::new(vec![]);
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// 文件的修改时间（Unix 秒）
pub fn mtime_of(path: &Path) -> i64 {
    std::fs::metadata(path)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}
