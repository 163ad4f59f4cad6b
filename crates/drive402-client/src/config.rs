//! 会话配置
//!
//! 所有结构都提供 `Default`，默认值即现场使用的取值。

use crate::TransportMode;
use std::time::Duration;

/// 连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionConfig {
    /// CAN 接口名称（如 "can0"）
    pub interface: String,
    /// 目标节点号
    pub node_id: u8,
    /// NMT 复位后等待 bootup 的时间窗
    pub bootup_timeout: Duration,
    /// 单次 SDO 事务超时
    pub sdo_timeout: Duration,
    /// 断开前进入预运行状态后的等待
    pub disconnect_settle: Duration,
    /// 初始传输模式
    pub transport: TransportMode,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            interface: "can0".to_string(),
            node_id: 2,
            bootup_timeout: Duration::from_secs(5),
            sdo_timeout: Duration::from_millis(500),
            disconnect_settle: Duration::from_millis(200),
            transport: TransportMode::Sdo,
        }
    }
}

/// 命令序列中的具名等待点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Settle {
    Shutdown,
    SwitchOn,
    EnableOperation,
    Disable,
    HomingMode,
    HomingStart,
    HomingRestore,
    MoveLatch,
    MoveClear,
    /// 触发沿之后不等待
    Immediate,
}

/// PDO 路径的步间等待
///
/// PDO 没有确认，只能靠固定延时让设备处理完上一帧；
/// SDO 路径以确认应答作为完成信号，使用 [`SettleDelays::none`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SettleDelays {
    pub shutdown: Duration,
    pub switch_on: Duration,
    pub enable_operation: Duration,
    pub disable: Duration,
    pub homing_mode: Duration,
    pub homing_start: Duration,
    pub homing_restore: Duration,
    pub move_latch: Duration,
    pub move_clear: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            shutdown: Duration::from_millis(300),
            switch_on: Duration::from_millis(300),
            enable_operation: Duration::from_millis(500),
            disable: Duration::from_millis(300),
            homing_mode: Duration::from_millis(200),
            homing_start: Duration::from_millis(500),
            homing_restore: Duration::from_millis(200),
            move_latch: Duration::from_millis(50),
            move_clear: Duration::from_millis(50),
        }
    }
}

impl SettleDelays {
    /// 全部为零
    pub fn none() -> Self {
        Self {
            shutdown: Duration::ZERO,
            switch_on: Duration::ZERO,
            enable_operation: Duration::ZERO,
            disable: Duration::ZERO,
            homing_mode: Duration::ZERO,
            homing_start: Duration::ZERO,
            homing_restore: Duration::ZERO,
            move_latch: Duration::ZERO,
            move_clear: Duration::ZERO,
        }
    }

    pub fn get(&self, step: Settle) -> Duration {
        match step {
            Settle::Shutdown => self.shutdown,
            Settle::SwitchOn => self.switch_on,
            Settle::EnableOperation => self.enable_operation,
            Settle::Disable => self.disable,
            Settle::HomingMode => self.homing_mode,
            Settle::HomingStart => self.homing_start,
            Settle::HomingRestore => self.homing_restore,
            Settle::MoveLatch => self.move_latch,
            Settle::MoveClear => self.move_clear,
            Settle::Immediate => Duration::ZERO,
        }
    }
}

/// 完成轮询参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PollConfig {
    /// 主动轮询间隔
    pub poll_interval: Duration,
    /// `wait` 未指定超时时的默认值
    pub default_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            default_timeout: Duration::from_secs(10),
        }
    }
}

/// 回零参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HomingConfig {
    /// 回零方法（0x6098），35 = 以当前位置为零点
    pub method: i8,
    /// 触发后确认 bit10 + bit12 的最长时间
    pub verify_timeout: Duration,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            method: drive402_protocol::HOMING_METHOD_CURRENT_POSITION,
            verify_timeout: Duration::from_secs(1),
        }
    }
}

/// 会话总配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriveConfig {
    pub connection: ConnectionConfig,
    /// PDO 路径的步间等待
    pub pdo_delays: SettleDelays,
    pub poll: PollConfig,
    pub homing: HomingConfig,
}
