mod remote;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

pub use remote::RemoteEmbedder;

/// 视频单帧的采样时间与特征向量
#[derive(Debug, Clone)]
pub struct FrameEmbedding {
    /// 帧所在秒数
    pub frame_time: i64,
    pub features: Vec<f32>,
}

/// 向量化服务的抽象接口
///
/// 模型结构与媒体解码属于外部能力，这里只要求把图片、
/// 视频帧序列或文字转换为固定维度的归一化向量。
#[async_trait]
pub trait Embedder: Send + Sync {
    /// 图片字节 -> 特征向量
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>>;

    /// 文字 -> 特征向量，空字符串返回 None
    async fn embed_text(&self, text: &str) -> Result<Option<Vec<f32>>>;

    /// 视频路径 -> 按采样间隔抽帧后的逐帧向量
    async fn embed_video(&self, path: &Path, frame_interval: u32) -> Result<Vec<FrameEmbedding>>;

    /// 向量维度，部署期内固定
    fn dim(&self) -> usize;
}
