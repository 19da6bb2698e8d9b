use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::SearchCaches;
use crate::indexer::BatchIndexer;
use crate::library::LibraryManager;
use crate::scanner::Scanner;
use crate::search::SearchEngine;

/// 应用状态
pub struct AppState {
    /// 扫描器
    pub scanner: Arc<Scanner>,
    /// 搜索引擎
    pub engine: Arc<SearchEngine>,
    /// 批量索引器
    pub indexer: Arc<BatchIndexer>,
    /// 素材库管理
    pub libraries: Arc<LibraryManager>,
    /// 搜索缓存
    pub caches: Arc<SearchCaches>,
    /// 上传临时目录
    pub upload_dir: PathBuf,
    /// 鉴权 token
    pub token: String,
}
