use std::sync::Arc;

use clap::{Parser, ValueEnum};

use crate::cache::SearchCaches;
use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, Opts, SearchOptions};
use crate::embed::{Embedder, RemoteEmbedder};
use crate::library::{LibraryKey, LibraryManager};
use crate::search::{SearchEngine, SearchFilters};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SearchKind {
    Image,
    Video,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 搜索类型
    #[arg(value_enum)]
    pub kind: SearchKind,
    /// 正向提示词
    pub positive: String,
    /// 反向提示词
    #[arg(long, default_value_t = String::new())]
    pub negative: String,
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub embed: EmbedOptions,
    /// 目标素材库
    #[arg(long, default_value = "permanent")]
    pub target: String,
    /// 输出格式
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let target: LibraryKey = self.target.parse()?;
        let libraries = Arc::new(LibraryManager::new(opts.data_dir.clone()));
        let embedder: Arc<dyn Embedder> =
            Arc::new(RemoteEmbedder::new(self.embed.embed_url.clone(), self.embed.embed_dim)?);
        let caches = Arc::new(SearchCaches::new(self.search.cache_size));
        let engine = SearchEngine::new(libraries, embedder, caches, self.search.clone());

        let results = match self.kind {
            SearchKind::Image => {
                engine
                    .search_image_by_text(
                        &target,
                        &self.positive,
                        &self.negative,
                        self.search.positive_threshold,
                        self.search.negative_threshold,
                        SearchFilters::default(),
                    )
                    .await?
            }
            SearchKind::Video => {
                engine
                    .search_video_by_text(
                        &target,
                        &self.positive,
                        &self.negative,
                        self.search.positive_threshold,
                        self.search.negative_threshold,
                        SearchFilters::default(),
                    )
                    .await?
            }
        };

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
            OutputFormat::Table => {
                for result in &results {
                    match (result.start_time, result.end_time) {
                        (Some(start), Some(end)) => println!(
                            "{:.2}\t{}\t{}s-{}s",
                            result.score.unwrap_or(0.0) * 100.0,
                            result.path,
                            start,
                            end
                        ),
                        _ => println!(
                            "{:.2}\t{}",
                            result.score.unwrap_or(0.0) * 100.0,
                            result.path
                        ),
                    }
                }
            }
        }
        Ok(())
    }
}
