//! EndoReport命令行主程序

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use endo_admin::config::DEFAULT_CONFIG_FILE;
use endo_admin::ConfigManager;
use endo_records::RecordStore;
use endo_storage::FileStore;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::Command;

/// EndoReport命令行参数
#[derive(Parser, Debug)]
#[command(name = "endoreport")]
#[command(about = "内镜检查报告管理工具")]
#[command(version)]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 数据目录，覆盖配置文件
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let manager = ConfigManager::new(Some(&config_path))?;
    let mut config = manager.config().clone();
    if let Some(data_dir) = &args.data_dir {
        config.storage.data_dir = data_dir.display().to_string();
    }

    // 初始化日志，输出到标准错误以免混入命令输出
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .init();

    debug!("Using configuration: {:?}", config);
    info!("Opening data directory {}", config.storage.data_dir);

    let kv = Arc::new(FileStore::new(config.data_dir()));
    let store = RecordStore::load(kv).await;
    for key in store.unreadable_keys() {
        warn!("Key \"{}\" could not be loaded and is read-only until a restore or clear", key);
    }

    cli::run(args.command, store, &config).await
}
