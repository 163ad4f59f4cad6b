//! 控制字 (0x6040)
//!
//! 控制字是"命令"而不是数据：主站只会写入少数几个固定值，
//! 非法值由设备拒绝（SDO 中止），本地不做校验。

use bilge::prelude::*;

/// 控制字位域（CiA 402）
///
/// - Bit 0: Switch on
/// - Bit 1: Enable voltage
/// - Bit 2: Quick stop（低有效）
/// - Bit 3: Enable operation
/// - Bit 4: New setpoint / Homing operation start（上升沿触发）
/// - Bit 5: Change set immediately
/// - Bit 6: Absolute (0) / relative (1)
/// - Bit 7: Fault reset（上升沿触发）
/// - Bit 8: Halt
/// - Bit 9-15: 保留 / 厂商自定义
#[bitsize(16)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlWord {
    pub switch_on: bool,
    pub enable_voltage: bool,
    pub quick_stop: bool,
    pub enable_operation: bool,
    pub new_setpoint: bool,
    pub change_set_immediately: bool,
    pub relative: bool,
    pub fault_reset: bool,
    pub halt: bool,
    pub reserved: u7,
}

impl ControlWord {
    /// 从原始值构造
    pub fn from_raw(raw: u16) -> Self {
        ControlWord::from(u16::new(raw))
    }

    /// 原始 16 位值
    pub fn raw(self) -> u16 {
        u16::from(self)
    }
}

impl From<ControlCommand> for ControlWord {
    fn from(command: ControlCommand) -> Self {
        ControlWord::from_raw(command.raw())
    }
}

/// PDS 状态机命令（控制字的固定取值）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlCommand {
    /// 0x06：→ Ready to switch on
    Shutdown,
    /// 0x07：→ Switched on
    SwitchOn,
    /// 0x0F：→ Operation enabled（bit4 低）
    EnableOperation,
    /// 0x1F：EnableOperation + bit4，触发新设定点 / 启动回零
    NewSetpoint,
    /// 0x00：→ Switch on disabled
    DisableVoltage,
    /// 0x02：→ Quick stop active
    QuickStop,
    /// 0x80：故障复位（上升沿）
    FaultReset,
}

impl ControlCommand {
    pub const fn raw(self) -> u16 {
        match self {
            ControlCommand::Shutdown => 0x0006,
            ControlCommand::SwitchOn => 0x0007,
            ControlCommand::EnableOperation => 0x000F,
            ControlCommand::NewSetpoint => 0x001F,
            ControlCommand::DisableVoltage => 0x0000,
            ControlCommand::QuickStop => 0x0002,
            ControlCommand::FaultReset => 0x0080,
        }
    }
}
