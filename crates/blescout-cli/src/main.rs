//! blescout CLI
//!
//! 扫描附近的 BLE 设备，或广播本机存在。

mod commands;

use anyhow::Result;
use blescout_core::ScoutSettings;
use blescout_core::logging::LogLevel;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "blescout", version, about = "BLE 设备发现工具")]
struct Cli {
    /// 日志级别 (覆盖设置文件，RUST_LOG 优先)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描附近设备
    Scan {
        /// 扫描超时时间 (秒)，0 表示一直扫描直到 Ctrl-C
        #[arg(short, long)]
        timeout: Option<u64>,
        /// 只显示有名称的设备
        #[arg(long)]
        named_only: bool,
        /// 服务 UUID 过滤 (可重复)
        #[arg(long = "service")]
        services: Vec<Uuid>,
        /// 记录每个原始扫描事件
        #[arg(long)]
        scan_log: bool,
        /// 以 JSON 输出最终结果
        #[arg(long)]
        json: bool,
    },
    /// 广播本机，直到 Ctrl-C
    Advertise {
        /// 广播的服务 UUID
        #[arg(long)]
        service: Option<Uuid>,
        /// 广播名称
        #[arg(long)]
        name: Option<String>,
    },
    /// 列出蓝牙适配器
    Adapters,
    /// 查看当前设置
    Config {
        /// 写入设置文件
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = ScoutSettings::load();
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }

    init_logging(settings.log_level);

    match cli.command {
        Commands::Scan {
            timeout,
            named_only,
            services,
            scan_log,
            json,
        } => {
            if let Some(secs) = timeout {
                settings.scan_timeout_secs = (secs > 0).then_some(secs);
            }
            settings.only_named_devices |= named_only;
            settings.scan_log |= scan_log;
            if !services.is_empty() {
                settings.service_filter = services;
            }
            commands::scan(&settings, json).await?;
        }
        Commands::Advertise { service, name } => {
            if let Some(service) = service {
                settings.service_uuid = service;
            }
            if let Some(name) = name {
                settings.device_name = name;
            }
            commands::advertise(&settings).await?;
        }
        Commands::Adapters => {
            commands::adapters(&settings).await;
        }
        Commands::Config { save } => {
            print!("{}", commands::render_settings(&settings)?);
            if save {
                settings.save()?;
                println!("# saved to {}", ScoutSettings::config_path().display());
            }
        }
    }

    Ok(())
}

fn init_logging(level: LogLevel) {
    // 桥接 log crate（blescout-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
