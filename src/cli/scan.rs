use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use crate::cache::SearchCaches;
use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, Opts, ScanOptions};
use crate::embed::{Embedder, RemoteEmbedder};
use crate::library::{LibraryKey, LibraryManager};
use crate::scanner::{ScanConfig, Scanner};

#[derive(Parser, Debug, Clone)]
pub struct ScanCommand {
    #[command(flatten)]
    pub scan: ScanOptions,
    #[command(flatten)]
    pub embed: EmbedOptions,
    /// 目标素材库
    #[arg(long, default_value = "permanent")]
    pub target: String,
}

impl SubCommandExtend for ScanCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let target: LibraryKey = self.target.parse()?;
        let libraries = Arc::new(LibraryManager::new(opts.data_dir.clone()));
        let embedder: Arc<dyn Embedder> =
            Arc::new(RemoteEmbedder::new(self.embed.embed_url.clone(), self.embed.embed_dim)?);
        let caches = Arc::new(SearchCaches::new(16));
        let config = ScanConfig::new(&self.scan)?;
        let scanner =
            Arc::new(Scanner::new(config, libraries, embedder, caches));

        let worker = {
            let scanner = scanner.clone();
            let target = target.clone();
            tokio::spawn(async move { scanner.scan_once(&target, None).await })
        };

        let pb = ProgressBar::new(0);
        pb.set_style(ProgressStyle::with_template(
            "{wide_bar} {pos}/{len} 预计剩余 {msg}s",
        )?);
        while !worker.is_finished() {
            let status = scanner.status();
            pb.set_length(status.total as u64);
            pb.set_position(status.processed as u64);
            pb.set_message(status.remain_seconds.to_string());
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        pb.finish_and_clear();

        let started = worker.await??;
        if !started {
            info!("已有扫描在进行，本次退出");
            return Ok(());
        }

        let status = scanner.status();
        info!(
            "扫描结束: 处理 {} 新图片 {} 新视频 {} 清理 {}",
            status.processed, status.new_images, status.new_videos, status.deleted
        );
        Ok(())
    }
}
