mod scan;
mod search;
pub mod server;

pub use scan::*;
pub use search::*;
pub use server::*;

use crate::config::Opts;

#[derive(clap::Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录并建立素材索引
    Scan(ScanCommand),
    /// 在命令行中搜索素材
    Search(SearchCommand),
    /// 启动 HTTP 服务
    Server(ServerCommand),
}

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
