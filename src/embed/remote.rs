use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;

use super::{Embedder, FrameEmbedding};
use crate::matcher;

/// 通过 HTTP 调用旁路向量化服务（CLIP 类模型）的客户端
///
/// 服务契约：
/// - `POST /embed/image`  请求体为图片字节，返回 `{"features": [f32]}`
/// - `POST /embed/text`   请求体为 `{"text": "..."}`
/// - `POST /embed/video`  请求体为 `{"path": "...", "frame_interval": N}`，
///   返回 `{"frames": [{"frame_time": s, "features": [f32]}]}`
pub struct RemoteEmbedder {
    base_url: String,
    dim: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct FeatureResponse {
    features: Vec<f32>,
}

#[derive(Deserialize)]
struct FrameResponse {
    frame_time: i64,
    features: Vec<f32>,
}

#[derive(Deserialize)]
struct VideoResponse {
    frames: Vec<FrameResponse>,
}

impl RemoteEmbedder {
    pub fn new(base_url: String, dim: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("构建 HTTP 客户端失败")?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), dim, client })
    }

    fn check_dim(&self, features: &[f32]) -> Result<()> {
        if features.len() != self.dim {
            return Err(anyhow!(
                "向量维度不一致: 期望 {}, 实际 {}",
                self.dim,
                features.len()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let resp: FeatureResponse = self
            .client
            .post(format!("{}/embed/image", self.base_url))
            .body(bytes.to_vec())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.check_dim(&resp.features)?;
        let mut features = resp.features;
        matcher::normalize(&mut features);
        Ok(features)
    }

    async fn embed_text(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if text.is_empty() {
            return Ok(None);
        }
        let resp: FeatureResponse = self
            .client
            .post(format!("{}/embed/text", self.base_url))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        self.check_dim(&resp.features)?;
        let mut features = resp.features;
        matcher::normalize(&mut features);
        Ok(Some(features))
    }

    async fn embed_video(&self, path: &Path, frame_interval: u32) -> Result<Vec<FrameEmbedding>> {
        let resp: VideoResponse = self
            .client
            .post(format!("{}/embed/video", self.base_url))
            .json(&serde_json::json!({
                "path": path.to_string_lossy(),
                "frame_interval": frame_interval,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        resp.frames
            .into_iter()
            .map(|f| {
                self.check_dim(&f.features)?;
                let mut features = f.features;
                matcher::normalize(&mut features);
                Ok(FrameEmbedding { frame_time: f.frame_time, features })
            })
            .collect()
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
