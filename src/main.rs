use clap::Parser;

use mediasearch::Opts;
use mediasearch::cli::{SubCommand, SubCommandExtend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let opts = Opts::parse();
    std::fs::create_dir_all(opts.data_dir.path())?;

    match &opts.subcmd {
        SubCommand::Scan(cmd) => cmd.run(&opts).await,
        SubCommand::Search(cmd) => cmd.run(&opts).await,
        SubCommand::Server(cmd) => cmd.run(&opts).await,
    }
}
