use std::sync::Arc;

use clap::Parser;
use log::info;
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;

use crate::cache::SearchCaches;
use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, Opts, ScanOptions, SearchOptions};
use crate::embed::{Embedder, RemoteEmbedder};
use crate::indexer::BatchIndexer;
use crate::library::LibraryManager;
use crate::scanner::{ScanConfig, Scanner};
use crate::search::SearchEngine;
use crate::server;

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub scan: ScanOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    #[command(flatten)]
    pub embed: EmbedOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8085")]
    pub addr: String,
    /// 请求验证 token，不填则随机生成
    #[arg(long, default_value_t = String::new())]
    pub token: String,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let libraries = Arc::new(LibraryManager::new(opts.data_dir.clone()));
        let embedder: Arc<dyn Embedder> =
            Arc::new(RemoteEmbedder::new(self.embed.embed_url.clone(), self.embed.embed_dim)?);
        let caches = Arc::new(SearchCaches::new(self.search.cache_size));

        let scanner = Arc::new(Scanner::new(
            ScanConfig::new(&self.scan)?,
            libraries.clone(),
            embedder.clone(),
            caches.clone(),
        ));
        let engine = Arc::new(SearchEngine::new(
            libraries.clone(),
            embedder.clone(),
            caches.clone(),
            self.search.clone(),
        ));
        let indexer = Arc::new(BatchIndexer::new(
            libraries.clone(),
            embedder.clone(),
            caches.clone(),
            &self.scan.image_suffix,
            &self.scan.video_suffix,
            self.scan.frame_interval,
            self.scan.checksum,
        ));

        let mut token = self.token.clone();
        if token.is_empty() {
            token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {token}");
        }

        let upload_dir = opts.data_dir.upload_dir();
        tokio::fs::create_dir_all(&upload_dir).await?;

        // 自动扫描调度在后台运行
        tokio::spawn(scanner.clone().run_auto_loop());

        let state = Arc::new(server::AppState {
            scanner,
            engine,
            indexer,
            libraries,
            caches,
            upload_dir,
            token,
        });
        let app = server::create_app(state);

        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}
