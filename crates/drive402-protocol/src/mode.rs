//! 运行模式 (0x6060 Modes of operation)

use num_enum::FromPrimitive;

/// CiA 402 运行模式
///
/// 未识别的取值保留原始值（`Other`），由设备决定是否接受。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(i8)]
pub enum OperationMode {
    NoMode = 0,
    ProfilePosition = 1,
    ProfileVelocity = 3,
    Homing = 6,
    #[num_enum(catch_all)]
    Other(i8),
}

impl OperationMode {
    pub fn raw(self) -> i8 {
        match self {
            OperationMode::NoMode => 0,
            OperationMode::ProfilePosition => 1,
            OperationMode::ProfileVelocity => 3,
            OperationMode::Homing => 6,
            OperationMode::Other(value) => value,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OperationMode::ProfilePosition => "Profile Position",
            OperationMode::ProfileVelocity => "Profile Velocity",
            OperationMode::Homing => "Homing",
            OperationMode::NoMode | OperationMode::Other(_) => "Unknown",
        }
    }
}

// 不能用 `#[default]`：num_enum 会把它当成 FromPrimitive 的兜底分支，与 catch_all 冲突
impl Default for OperationMode {
    fn default() -> Self {
        OperationMode::ProfilePosition
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.raw(), self.name())
    }
}

/// 回零方法 35：以当前位置为零点（CiA 402-2 中的 "current position"）
pub const HOMING_METHOD_CURRENT_POSITION: i8 = 35;
