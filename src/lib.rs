pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod embed;
pub mod indexer;
pub mod library;
pub mod matcher;
pub mod phash;
pub mod scanner;
pub mod search;
mod server;
pub mod stitch;

pub use config::Opts;
pub use library::{LibraryKey, LibraryManager};
pub use scanner::Scanner;
