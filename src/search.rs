use std::sync::Arc;

use anyhow::{Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use log::{info, warn};
use serde::Serialize;

use crate::cache::{CacheShape, SearchCaches};
use crate::config::SearchOptions;
use crate::db::crud;
use crate::embed::Embedder;
use crate::library::{LibraryKey, LibraryManager};
use crate::matcher;
use crate::stitch;

/// 查询主体，作为缓存键的一部分
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QuerySubject {
    /// 正/反向提示词
    Text { positive: String, negative: String },
    /// 上传文件的内容哈希
    Upload(String),
    /// 库内已有图片
    Stored(i64),
    /// 路径子串
    Path(String),
}

/// 路径与修改时间过滤
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SearchFilters {
    pub path: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl SearchFilters {
    fn matches(&self, path: &str, modify_time: i64) -> bool {
        if let Some(keyword) = &self.path {
            if !path.contains(keyword.as_str()) {
                return false;
            }
        }
        if self.start_time.is_some_and(|t| modify_time < t) {
            return false;
        }
        if self.end_time.is_some_and(|t| modify_time > t) {
            return false;
        }
        true
    }
}

/// 缓存键：完整的查询参数元组
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub library: String,
    pub subject: QuerySubject,
    pub positive_threshold: u32,
    pub negative_threshold: u32,
    pub filters: SearchFilters,
}

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub url: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

/// 以图搜索的查询来源
pub enum ImageSubject {
    /// 库内图片 ID
    Stored(i64),
    /// 上传的图片字节
    Upload(Vec<u8>),
}

/// 搜索引擎：整库线性扫描 + 相似度匹配 + 结果缓存
pub struct SearchEngine {
    libraries: Arc<LibraryManager>,
    embedder: Arc<dyn Embedder>,
    caches: Arc<SearchCaches>,
    options: SearchOptions,
}

impl SearchEngine {
    pub fn new(
        libraries: Arc<LibraryManager>,
        embedder: Arc<dyn Embedder>,
        caches: Arc<SearchCaches>,
        options: SearchOptions,
    ) -> Self {
        Self { libraries, embedder, caches, options }
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }

    /// 以文搜图
    pub async fn search_image_by_text(
        &self,
        library: &LibraryKey,
        positive: &str,
        negative: &str,
        positive_threshold: u32,
        negative_threshold: u32,
        filters: SearchFilters,
    ) -> Result<Vec<SearchResult>> {
        let key = CacheKey {
            library: library.as_str().to_string(),
            subject: QuerySubject::Text {
                positive: positive.to_string(),
                negative: negative.to_string(),
            },
            positive_threshold,
            negative_threshold,
            filters: filters.clone(),
        };
        if let Some(hit) = self.caches.get(CacheShape::TextImage, &key) {
            return Ok(hit);
        }

        let positive_feature = self.embedder.embed_text(positive).await?;
        let negative_feature = self.embedder.embed_text(negative).await?;
        let results = self
            .search_image_by_feature(
                library,
                positive_feature.as_deref(),
                negative_feature.as_deref(),
                positive_threshold,
                negative_threshold,
                &filters,
            )
            .await?;
        self.caches.put(CacheShape::TextImage, key, results.clone());
        Ok(results)
    }

    /// 以图搜图
    pub async fn search_image_by_image(
        &self,
        library: &LibraryKey,
        subject: ImageSubject,
        threshold: u32,
        filters: SearchFilters,
    ) -> Result<Vec<SearchResult>> {
        let (cache_subject, feature) = self.resolve_image_subject(library, subject).await?;
        let Some(feature) = feature else {
            return Ok(vec![]);
        };
        let key = CacheKey {
            library: library.as_str().to_string(),
            subject: cache_subject,
            positive_threshold: threshold,
            negative_threshold: 0,
            filters: filters.clone(),
        };
        if let Some(hit) = self.caches.get(CacheShape::ImageImage, &key) {
            return Ok(hit);
        }

        let results = self
            .search_image_by_feature(library, Some(&feature), None, threshold, 0, &filters)
            .await?;
        self.caches.put(CacheShape::ImageImage, key, results.clone());
        Ok(results)
    }

    /// 以文搜视频
    pub async fn search_video_by_text(
        &self,
        library: &LibraryKey,
        positive: &str,
        negative: &str,
        positive_threshold: u32,
        negative_threshold: u32,
        filters: SearchFilters,
    ) -> Result<Vec<SearchResult>> {
        let key = CacheKey {
            library: library.as_str().to_string(),
            subject: QuerySubject::Text {
                positive: positive.to_string(),
                negative: negative.to_string(),
            },
            positive_threshold,
            negative_threshold,
            filters: filters.clone(),
        };
        if let Some(hit) = self.caches.get(CacheShape::TextVideo, &key) {
            return Ok(hit);
        }

        let positive_feature = self.embedder.embed_text(positive).await?;
        let negative_feature = self.embedder.embed_text(negative).await?;
        let results = self
            .search_video_by_feature(
                library,
                positive_feature.as_deref(),
                negative_feature.as_deref(),
                positive_threshold,
                negative_threshold,
                &filters,
            )
            .await?;
        self.caches.put(CacheShape::TextVideo, key, results.clone());
        Ok(results)
    }

    /// 以图搜视频
    pub async fn search_video_by_image(
        &self,
        library: &LibraryKey,
        subject: ImageSubject,
        threshold: u32,
        filters: SearchFilters,
    ) -> Result<Vec<SearchResult>> {
        let (cache_subject, feature) = self.resolve_image_subject(library, subject).await?;
        let Some(feature) = feature else {
            return Ok(vec![]);
        };
        let key = CacheKey {
            library: library.as_str().to_string(),
            subject: cache_subject,
            positive_threshold: threshold,
            negative_threshold: 0,
            filters: filters.clone(),
        };
        if let Some(hit) = self.caches.get(CacheShape::ImageVideo, &key) {
            return Ok(hit);
        }

        let results = self
            .search_video_by_feature(library, Some(&feature), None, threshold, 0, &filters)
            .await?;
        self.caches.put(CacheShape::ImageVideo, key, results.clone());
        Ok(results)
    }

    /// 图文比对，返回两者的余弦相似度
    pub async fn match_text_and_image(&self, text: &str, image: &[u8]) -> Result<f32> {
        let Some(text_feature) = self.embedder.embed_text(text).await? else {
            bail!("比对文本不能为空");
        };
        let image_feature = self.embedder.embed_image(image).await?;
        Ok(matcher::match_one(&text_feature, &image_feature))
    }

    /// 路径子串搜索图片
    pub async fn search_images_by_path_keyword(
        &self,
        library: &LibraryKey,
        keyword: &str,
    ) -> Result<Vec<SearchResult>> {
        let key = CacheKey {
            library: library.as_str().to_string(),
            subject: QuerySubject::Path(keyword.to_string()),
            positive_threshold: 0,
            negative_threshold: 0,
            filters: SearchFilters::default(),
        };
        if let Some(hit) = self.caches.get(CacheShape::PathImage, &key) {
            return Ok(hit);
        }

        let pool = self.libraries.pool(library).await?;
        let results = crud::search_images_by_path(&pool, keyword, self.options.max_results as i64)
            .await?
            .into_iter()
            .map(|(id, path)| SearchResult {
                url: format!("api/get_image/{id}"),
                path,
                score: None,
                start_time: None,
                end_time: None,
            })
            .collect::<Vec<_>>();
        self.caches.put(CacheShape::PathImage, key, results.clone());
        Ok(results)
    }

    /// 路径子串搜索视频
    pub async fn search_videos_by_path_keyword(
        &self,
        library: &LibraryKey,
        keyword: &str,
    ) -> Result<Vec<SearchResult>> {
        let key = CacheKey {
            library: library.as_str().to_string(),
            subject: QuerySubject::Path(keyword.to_string()),
            positive_threshold: 0,
            negative_threshold: 0,
            filters: SearchFilters::default(),
        };
        if let Some(hit) = self.caches.get(CacheShape::PathVideo, &key) {
            return Ok(hit);
        }

        let pool = self.libraries.pool(library).await?;
        let results = crud::search_videos_by_path(&pool, keyword, self.options.max_results as i64)
            .await?
            .into_iter()
            .map(|path| SearchResult {
                url: format!("api/get_video/{}", URL_SAFE.encode(&path)),
                path,
                score: None,
                start_time: None,
                end_time: None,
            })
            .collect::<Vec<_>>();
        self.caches.put(CacheShape::PathVideo, key, results.clone());
        Ok(results)
    }

    /// 解析以图搜索的查询来源，返回缓存主体与特征向量
    async fn resolve_image_subject(
        &self,
        library: &LibraryKey,
        subject: ImageSubject,
    ) -> Result<(QuerySubject, Option<Vec<f32>>)> {
        match subject {
            ImageSubject::Stored(id) => {
                let pool = self.libraries.pool(library).await?;
                let Some(record) = crud::get_image_by_id(&pool, id).await? else {
                    return Ok((QuerySubject::Stored(id), None));
                };
                let feature = match matcher::features_from_blob(&record.features) {
                    Some(feature) => Some(feature),
                    None => {
                        warn!("特征向量损坏，删除记录: {} ({})", record.path, record.id);
                        crud::delete_image_by_id(&pool, record.id).await?;
                        None
                    }
                };
                Ok((QuerySubject::Stored(id), feature))
            }
            ImageSubject::Upload(bytes) => {
                let hash = blake3::hash(&bytes).to_hex().to_string();
                let feature = self.embedder.embed_image(&bytes).await?;
                Ok((QuerySubject::Upload(hash), Some(feature)))
            }
        }
    }

    /// 通过特征搜索图片：整库比对后按分数降序
    async fn search_image_by_feature(
        &self,
        library: &LibraryKey,
        positive: Option<&[f32]>,
        negative: Option<&[f32]>,
        positive_threshold: u32,
        negative_threshold: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>> {
        let start = std::time::Instant::now();
        let pool = self.libraries.pool(library).await?;

        let mut candidates = Vec::new();
        for record in crud::all_images(&pool).await? {
            if !filters.matches(&record.path, record.modify_time) {
                continue;
            }
            match matcher::features_from_blob(&record.features) {
                Some(feature) => candidates.push((record.id, record.path, feature)),
                None => {
                    // 损坏的向量直接删除，不参与本次比对
                    warn!("特征向量损坏，删除记录: {} ({})", record.path, record.id);
                    crud::delete_image_by_id(&pool, record.id).await?;
                }
            }
        }
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let features: Vec<Vec<f32>> = candidates.iter().map(|(_, _, f)| f.clone()).collect();
        let scores = matcher::match_batch(
            positive,
            negative,
            &features,
            positive_threshold,
            negative_threshold,
        );

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .zip(scores)
            .filter(|(_, score)| *score > 0.0)
            .map(|((id, path, _), score)| SearchResult {
                url: format!("api/get_image/{id}"),
                path,
                score: Some(score),
                start_time: None,
                end_time: None,
            })
            .collect();
        sort_by_score(&mut results);
        results.truncate(self.options.max_results);
        info!("图片搜索用时 {:.2}s", start.elapsed().as_secs_f64());
        Ok(results)
    }

    /// 通过特征搜索视频：逐个视频比对帧序列并拼接片段
    async fn search_video_by_feature(
        &self,
        library: &LibraryKey,
        positive: Option<&[f32]>,
        negative: Option<&[f32]>,
        positive_threshold: u32,
        negative_threshold: u32,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchResult>> {
        let start = std::time::Instant::now();
        let pool = self.libraries.pool(library).await?;

        let mut results = Vec::new();
        for path in crud::all_video_paths(&pool).await? {
            let frames = crud::video_frames_by_path(&pool, &path).await?;
            let Some(first) = frames.first() else {
                continue;
            };
            if !filters.matches(&path, first.modify_time) {
                continue;
            }

            let mut frame_times = Vec::with_capacity(frames.len());
            let mut features = Vec::with_capacity(frames.len());
            for frame in &frames {
                match matcher::features_from_blob(&frame.features) {
                    Some(feature) => {
                        frame_times.push(frame.frame_time);
                        features.push(feature);
                    }
                    None => {
                        warn!("帧向量损坏，删除记录: {} ({})", path, frame.id);
                        crud::delete_video_frame_by_id(&pool, frame.id).await?;
                    }
                }
            }
            if features.is_empty() {
                continue;
            }

            let scores = matcher::match_batch(
                positive,
                negative,
                &features,
                positive_threshold,
                negative_threshold,
            );
            for segment in stitch::stitch(&frame_times, &scores) {
                results.push(SearchResult {
                    url: format!(
                        "api/get_video/{}#t={:.1},{:.1}",
                        URL_SAFE.encode(&path),
                        segment.start_time as f64,
                        segment.end_time as f64,
                    ),
                    path: path.clone(),
                    score: Some(segment.score),
                    start_time: Some(segment.start_time),
                    end_time: Some(segment.end_time),
                });
            }
        }
        sort_by_score(&mut results);
        results.truncate(self.options.max_results);
        info!("视频搜索用时 {:.2}s", start.elapsed().as_secs_f64());
        Ok(results)
    }

    /// 取库内图片记录，供下载接口使用
    pub async fn get_image(
        &self,
        library: &LibraryKey,
        id: i64,
    ) -> Result<Option<crate::db::ImageRecord>> {
        let pool = self.libraries.pool(library).await?;
        Ok(crud::get_image_by_id(&pool, id).await?)
    }

    /// 校验视频路径在库内存在，供下载接口使用
    pub async fn video_exists(&self, library: &LibraryKey, path: &str) -> Result<bool> {
        let pool = self.libraries.pool(library).await?;
        Ok(crud::video_path_exists(&pool, path).await?)
    }
}

fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .unwrap_or(0.0)
            .partial_cmp(&a.score.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_match_path_and_time() {
        let filters = SearchFilters {
            path: Some("photos".to_string()),
            start_time: Some(100),
            end_time: Some(200),
        };
        assert!(filters.matches("/media/photos/a.jpg", 150));
        assert!(!filters.matches("/media/videos/a.jpg", 150));
        assert!(!filters.matches("/media/photos/a.jpg", 99));
        assert!(!filters.matches("/media/photos/a.jpg", 201));
        assert!(SearchFilters::default().matches("/anything", 0));
    }

    #[test]
    fn cache_key_distinguishes_thresholds() {
        let base = CacheKey {
            library: "permanent".to_string(),
            subject: QuerySubject::Text {
                positive: "red".to_string(),
                negative: String::new(),
            },
            positive_threshold: 10,
            negative_threshold: 10,
            filters: SearchFilters::default(),
        };
        let mut other = base.clone();
        other.positive_threshold = 20;
        assert_ne!(base, other);
        assert_eq!(base, base.clone());
    }

    #[test]
    fn sort_is_descending() {
        let mut results = vec![
            SearchResult {
                url: "a".into(),
                path: "a".into(),
                score: Some(0.3),
                start_time: None,
                end_time: None,
            },
            SearchResult {
                url: "b".into(),
                path: "b".into(),
                score: Some(0.9),
                start_time: None,
                end_time: None,
            },
        ];
        sort_by_score(&mut results);
        assert_eq!(results[0].path, "b");
    }
}
