//! 配置管理命令
//!
//! 配置文件为 TOML，默认位于 `<config_dir>/drive402/config.toml`。

use anyhow::{Context, Result};
use clap::Subcommand;
use drive402_client::{DriveConfig, MAX_WAIT, TransportMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认配置文件路径
pub fn default_config_file() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
    path.push("drive402");
    path.push("config.toml");
    Ok(path)
}

/// CLI 配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// CAN 接口
    pub interface: Option<String>,
    /// 驱动器节点号
    pub node_id: Option<u8>,
    /// 启动时的传输模式
    pub transport: Option<TransportMode>,
    /// `wait` 默认超时（秒）
    pub wait_timeout: Option<f64>,
    /// bootup 等待时间窗（秒）
    pub bootup_timeout: Option<f64>,
    /// 单次 SDO 超时（毫秒）
    pub sdo_timeout_ms: Option<u64>,
}

impl CliConfig {
    /// 加载配置；文件不存在时返回默认值
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("解析配置文件失败: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("创建配置目录失败")?;
        }
        let content = toml::to_string_pretty(self).context("序列化配置失败")?;
        fs::write(path, format!("# drive402 CLI configuration\n\n{}", content))
            .context("写入配置文件失败")?;
        Ok(())
    }

    /// 覆盖会话配置中已设置的字段
    pub fn apply(&self, config: &mut DriveConfig) -> Result<()> {
        if let Some(interface) = &self.interface {
            config.connection.interface = interface.clone();
        }
        if let Some(node_id) = self.node_id {
            config.connection.node_id = node_id;
        }
        if let Some(transport) = self.transport {
            config.connection.transport = transport;
        }
        if let Some(secs) = self.wait_timeout {
            config.poll.default_timeout = seconds(secs, "wait_timeout")?;
        }
        if let Some(secs) = self.bootup_timeout {
            config.connection.bootup_timeout = seconds(secs, "bootup_timeout")?;
        }
        if let Some(ms) = self.sdo_timeout_ms {
            config.connection.sdo_timeout = bounded(Duration::from_millis(ms), "sdo_timeout_ms")?;
        }
        Ok(())
    }
}

fn seconds(value: f64, field: &str) -> Result<Duration> {
    let duration =
        Duration::try_from_secs_f64(value).with_context(|| format!("{} 无效: {}", field, value))?;
    bounded(duration, field)
}

/// 时限不得超过 [`MAX_WAIT`]
fn bounded(duration: Duration, field: &str) -> Result<Duration> {
    if duration > MAX_WAIT {
        anyhow::bail!("{} 超出上限 {:?}: {:?}", field, MAX_WAIT, duration);
    }
    Ok(duration)
}

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 设置配置项
    Set {
        /// CAN 接口名称（如 can0）
        #[arg(short, long)]
        interface: Option<String>,

        /// 驱动器节点号
        #[arg(short, long)]
        node_id: Option<u8>,

        /// 传输模式（sdo / pdo）
        #[arg(short, long)]
        transport: Option<TransportMode>,

        /// wait 默认超时（秒）
        #[arg(short, long)]
        wait_timeout: Option<f64>,
    },

    /// 获取配置项
    Get {
        /// 配置项名称
        #[arg(default_value = "all")]
        key: String,
    },

    /// 检查配置
    Check,
}

impl ConfigCommand {
    pub fn execute(self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Set {
                interface,
                node_id,
                transport,
                wait_timeout,
            } => {
                let mut config = CliConfig::load(path)?;
                if let Some(iface) = interface {
                    println!("✅ 设置默认接口: {}", iface);
                    config.interface = Some(iface);
                }
                if let Some(id) = node_id {
                    println!("✅ 设置节点号: {}", id);
                    config.node_id = Some(id);
                }
                if let Some(mode) = transport {
                    println!("✅ 设置传输模式: {}", mode);
                    config.transport = Some(mode);
                }
                if let Some(secs) = wait_timeout {
                    seconds(secs, "wait_timeout")?;
                    println!("✅ 设置 wait 超时: {} s", secs);
                    config.wait_timeout = Some(secs);
                }
                config.save(path)
            },

            ConfigCommand::Get { key } => {
                let config = CliConfig::load(path)?;
                let unset = || "(未设置)".to_string();
                match key.as_str() {
                    "interface" => println!("{}", config.interface.unwrap_or_else(unset)),
                    "node_id" => {
                        println!("{}", config.node_id.map(|v| v.to_string()).unwrap_or_else(unset))
                    },
                    "transport" => println!(
                        "{}",
                        config.transport.map(|v| v.to_string()).unwrap_or_else(unset)
                    ),
                    "wait_timeout" => println!(
                        "{}",
                        config.wait_timeout.map(|v| v.to_string()).unwrap_or_else(unset)
                    ),
                    _ => print_config(&config),
                }
                Ok(())
            },

            ConfigCommand::Check => {
                let config = CliConfig::load(path)?;
                let mut effective = DriveConfig::default();
                config.apply(&mut effective)?;
                println!("配置文件: {}", path.display());
                print_config(&config);
                println!("生效值:");
                println!("  接口: {}", effective.connection.interface);
                println!("  节点号: {}", effective.connection.node_id);
                println!("  传输模式: {}", effective.connection.transport);
                println!("  wait 超时: {:?}", effective.poll.default_timeout);
                println!("  bootup 超时: {:?}", effective.connection.bootup_timeout);
                println!("✅ 配置有效");
                Ok(())
            },
        }
    }
}

fn print_config(config: &CliConfig) {
    println!("drive402 CLI 配置:");
    println!("  接口: {:?}", config.interface);
    println!("  节点号: {:?}", config.node_id);
    println!("  传输模式: {:?}", config.transport);
    println!("  wait 超时: {:?}", config.wait_timeout);
    println!("  bootup 超时: {:?}", config.bootup_timeout);
    println!("  SDO 超时 (ms): {:?}", config.sdo_timeout_ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load(&dir.path().join("none.toml")).unwrap();
        assert_eq!(config, CliConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = CliConfig {
            interface: Some("vcan0".to_string()),
            node_id: Some(5),
            transport: Some(TransportMode::Pdo),
            wait_timeout: Some(2.5),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(CliConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_apply_overrides_only_set_fields() {
        let config: CliConfig = toml::from_str(
            r#"
            node_id = 7
            transport = "pdo"
            wait_timeout = 0.5
            "#,
        )
        .unwrap();
        let mut drive = DriveConfig::default();
        config.apply(&mut drive).unwrap();
        assert_eq!(drive.connection.interface, "can0");
        assert_eq!(drive.connection.node_id, 7);
        assert_eq!(drive.connection.transport, TransportMode::Pdo);
        assert_eq!(drive.poll.default_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let config = CliConfig {
            bootup_timeout: Some(-1.0),
            ..Default::default()
        };
        assert!(config.apply(&mut DriveConfig::default()).is_err());
    }

    #[test]
    fn test_huge_timeouts_rejected() {
        let config: CliConfig = toml::from_str("wait_timeout = 1e19").unwrap();
        assert!(config.apply(&mut DriveConfig::default()).is_err());

        let config = CliConfig {
            sdo_timeout_ms: Some(u64::MAX),
            ..Default::default()
        };
        assert!(config.apply(&mut DriveConfig::default()).is_err());

        let config = CliConfig {
            wait_timeout: Some(MAX_WAIT.as_secs_f64()),
            ..Default::default()
        };
        let mut drive = DriveConfig::default();
        config.apply(&mut drive).unwrap();
        assert_eq!(drive.poll.default_timeout, MAX_WAIT);
    }
}
