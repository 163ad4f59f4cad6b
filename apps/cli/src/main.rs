//! # drive402 CLI
//!
//! CiA 402 驱动器交互式命令行工具。
//!
//! ```bash
//! # 配置默认接口
//! drive402-cli config set --interface can0 --node-id 2
//!
//! # 交互式 Shell
//! $ drive402-cli
//! drive402> connect
//! drive402> enable
//! drive402> home
//! drive402> move 50000 wait
//! drive402> exit
//!
//! # 无硬件：内置模拟驱动器
//! $ drive402-cli --simulate
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use drive402_client::{DriveConfig, TransportMode};
use std::path::PathBuf;

mod commands;
mod modes;
mod parser;

use commands::{CliConfig, ConfigCommand, default_config_file};
use modes::repl::run_repl;

/// drive402 CLI - CiA 402 驱动器命令行工具
#[derive(Parser, Debug)]
#[command(name = "drive402-cli")]
#[command(about = "Interactive shell for CiA 402 drives over CANopen", long_about = None)]
#[command(version)]
struct Cli {
    /// CAN 接口（覆盖配置文件）
    #[arg(short, long)]
    interface: Option<String>,

    /// 驱动器节点号（覆盖配置文件）
    #[arg(short, long)]
    node_id: Option<u8>,

    /// 初始传输模式（sdo / pdo）
    #[arg(short, long)]
    transport: Option<TransportMode>,

    /// 使用内置模拟驱动器代替 CAN 硬件
    #[arg(long)]
    simulate: bool,

    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 启动交互式 Shell（默认）
    Shell,

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// 默认值 ← 配置文件 ← 命令行参数
    fn drive_config(&self, file: &CliConfig) -> Result<DriveConfig> {
        let mut config = DriveConfig::default();
        file.apply(&mut config)?;
        if let Some(interface) = &self.interface {
            config.connection.interface = interface.clone();
        }
        if let Some(node_id) = self.node_id {
            config.connection.node_id = node_id;
        }
        if let Some(transport) = self.transport {
            config.connection.transport = transport;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("drive402_cli=info".parse()?),
        )
        .init();

    let mut cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_file()?,
    };

    match cli.command.take() {
        Some(Commands::Config(cmd)) => cmd.execute(&config_path),
        Some(Commands::Shell) | None => {
            let file = CliConfig::load(&config_path)?;
            let config = cli.drive_config(&file)?;
            run_repl(config, cli.simulate)
        },
    }
}
