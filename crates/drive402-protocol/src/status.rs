//! 状态字 (0x6041) 与 PDS 状态推导
//!
//! `DriveState` 从不单独存储，总是由最近一次观测到的状态字重新计算。

use bilge::prelude::*;

/// 状态字位域（CiA 402）
///
/// - Bit 0: Ready to switch on
/// - Bit 1: Switched on
/// - Bit 2: Operation enabled
/// - Bit 3: Fault
/// - Bit 4: Voltage enabled
/// - Bit 5: Quick stop（低有效）
/// - Bit 6: Switch on disabled
/// - Bit 7: Warning
/// - Bit 8: 厂商自定义
/// - Bit 9: Remote
/// - Bit 10: Target reached
/// - Bit 11: Internal limit active
/// - Bit 12: Set-point acknowledge / Homing attained（取决于运行模式）
/// - Bit 13: Following error / Homing error（取决于运行模式）
/// - Bit 14-15: 厂商自定义
#[bitsize(16)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusWord {
    pub ready_to_switch_on: bool,
    pub switched_on: bool,
    pub operation_enabled: bool,
    pub fault: bool,
    pub voltage_enabled: bool,
    pub quick_stop: bool,
    pub switch_on_disabled: bool,
    pub warning: bool,
    pub manufacturer_specific: bool,
    pub remote: bool,
    pub target_reached: bool,
    pub internal_limit_active: bool,
    pub setpoint_acknowledge: bool,
    pub following_error: bool,
    pub reserved: u2,
}

impl StatusWord {
    pub const TARGET_REACHED: u16 = 1 << 10;
    pub const HOMING_ATTAINED: u16 = 1 << 12;

    pub fn from_raw(raw: u16) -> Self {
        StatusWord::from(u16::new(raw))
    }

    pub fn raw(self) -> u16 {
        u16::from(self)
    }

    /// 回零模式下 bit12 表示 "homing attained"
    pub fn homing_attained(self) -> bool {
        self.setpoint_acknowledge()
    }

    /// 回零完成：target reached 与 homing attained 同时置位
    pub fn homing_complete(self) -> bool {
        self.target_reached() && self.homing_attained()
    }

    pub fn state(self) -> DriveState {
        state_from_status(self.raw())
    }
}

/// PDS 状态（CiA 402 电源驱动系统状态机）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DriveState {
    NotReadyToSwitchOn,
    SwitchOnDisabled,
    ReadyToSwitchOn,
    SwitchedOn,
    OperationEnabled,
    QuickStopActive,
    FaultReactionActive,
    Fault,
    /// 状态字不匹配任何已知掩码
    Unknown,
}

impl DriveState {
    pub fn name(self) -> &'static str {
        match self {
            DriveState::NotReadyToSwitchOn => "Not ready to switch on",
            DriveState::SwitchOnDisabled => "Switch on disabled",
            DriveState::ReadyToSwitchOn => "Ready to switch on",
            DriveState::SwitchedOn => "Switched on",
            DriveState::OperationEnabled => "Operation enabled",
            DriveState::QuickStopActive => "Quick stop active",
            DriveState::FaultReactionActive => "Fault reaction active",
            DriveState::Fault => "Fault",
            DriveState::Unknown => "Unknown",
        }
    }

    /// 只有 Operation enabled 状态接受运动命令（回零 / 定位）
    pub fn can_accept_motion(self) -> bool {
        self == DriveState::OperationEnabled
    }
}

impl std::fmt::Display for DriveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// (掩码, 值, 状态) 查找表
const STATE_TABLE: [(u16, u16, DriveState); 8] = [
    (0x004F, 0x0000, DriveState::NotReadyToSwitchOn),
    (0x004F, 0x0040, DriveState::SwitchOnDisabled),
    (0x006F, 0x0021, DriveState::ReadyToSwitchOn),
    (0x006F, 0x0023, DriveState::SwitchedOn),
    (0x006F, 0x0027, DriveState::OperationEnabled),
    (0x006F, 0x0007, DriveState::QuickStopActive),
    (0x004F, 0x000F, DriveState::FaultReactionActive),
    (0x004F, 0x0008, DriveState::Fault),
];

/// 由状态字推导 PDS 状态
///
/// 纯函数且全定义：不匹配任何表项的状态字返回 `DriveState::Unknown`。
pub fn state_from_status(status_word: u16) -> DriveState {
    STATE_TABLE
        .iter()
        .find(|(mask, value, _)| status_word & mask == *value)
        .map(|(_, _, state)| *state)
        .unwrap_or(DriveState::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_required_mask_pairs() {
        assert_eq!(state_from_status(0x0040), DriveState::SwitchOnDisabled);
        assert_eq!(state_from_status(0x0021), DriveState::ReadyToSwitchOn);
        assert_eq!(state_from_status(0x0023), DriveState::SwitchedOn);
        assert_eq!(state_from_status(0x0027), DriveState::OperationEnabled);
    }

    #[test]
    fn test_masks_ignore_unrelated_bits() {
        // target reached + homing attained + voltage enabled 不影响状态
        assert_eq!(state_from_status(0x1437), DriveState::OperationEnabled);
        assert_eq!(state_from_status(0x0250), DriveState::SwitchOnDisabled);
        assert_eq!(state_from_status(0x0231), DriveState::ReadyToSwitchOn);
    }

    #[test]
    fn test_fault_states() {
        assert_eq!(state_from_status(0x0008), DriveState::Fault);
        assert_eq!(state_from_status(0x000F), DriveState::FaultReactionActive);
        assert_eq!(state_from_status(0x0007), DriveState::QuickStopActive);
        assert_eq!(state_from_status(0x0000), DriveState::NotReadyToSwitchOn);
    }

    #[test]
    fn test_unknown_words() {
        // bit6 与 bit0 同时置位不是合法组合
        assert_eq!(state_from_status(0x0041), DriveState::Unknown);
        assert_eq!(state_from_status(0x0003), DriveState::Unknown);
        assert_eq!(state_from_status(0xFFFF), DriveState::Unknown);
    }

    #[test]
    fn test_status_word_bits() {
        let sw = StatusWord::from_raw(0x1427);
        assert!(sw.ready_to_switch_on());
        assert!(sw.switched_on());
        assert!(sw.operation_enabled());
        assert!(sw.target_reached());
        assert!(sw.homing_attained());
        assert!(sw.homing_complete());
        assert_eq!(sw.state(), DriveState::OperationEnabled);

        let sw = StatusWord::from_raw(0x0427);
        assert!(sw.target_reached());
        assert!(!sw.homing_complete());
        assert_eq!(sw.raw() & StatusWord::TARGET_REACHED, StatusWord::TARGET_REACHED);
    }

    #[test]
    fn test_only_operation_enabled_accepts_motion() {
        assert!(DriveState::OperationEnabled.can_accept_motion());
        assert!(!DriveState::SwitchedOn.can_accept_motion());
        assert!(!DriveState::Unknown.can_accept_motion());
    }

    proptest! {
        /// 任意状态字：不 panic、结果确定，且最多匹配一个表项
        #[test]
        fn prop_state_from_status_is_total(sw in any::<u16>()) {
            let first = state_from_status(sw);
            let second = state_from_status(sw);
            prop_assert_eq!(first, second);

            let matches = STATE_TABLE
                .iter()
                .filter(|(mask, value, _)| sw & mask == *value)
                .count();
            prop_assert!(matches <= 1);
            prop_assert_eq!(matches == 0, first == DriveState::Unknown);
        }
    }
}
