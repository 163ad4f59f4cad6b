//! 会话层错误类型
//!
//! - `Precondition`: 本地前置条件检查失败，未发出任何寄存器写入
//! - `DeviceRejected`: 设备以 SDO 中止码拒绝访问（原始码保留）
//! - `UnexpectedState`: 序列执行完毕但状态字与预期不符（不重试）
//! - `Transport`: 链路错误（超时、CAN 故障）
//!
//! 等待超时不是错误，见 [`WaitOutcome`](crate::WaitOutcome)。

use drive402_driver::DriverError;
use drive402_protocol::{AbortCategory, DriveState, OdEntry, SdoAbortCode};
use std::time::Duration;
use thiserror::Error;

/// 本地前置条件
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    #[error("not connected")]
    NotConnected,
    #[error("drive is not enabled")]
    NotEnabled,
    #[error("drive is already enabled")]
    AlreadyEnabled,
}

/// 会话层错误类型
#[derive(Error, Debug)]
pub enum DriveError {
    /// 打开适配器或建立节点客户端失败
    #[error("Connection to '{interface}' failed: {source}")]
    Connection {
        interface: String,
        #[source]
        source: DriverError,
    },

    /// 复位后 bootup 等待超时
    #[error("Node did not boot within {timeout:?}")]
    BootTimeout { timeout: Duration },

    /// 设备拒绝读写
    #[error("Device rejected {} on 0x{index:04X}:{sub_index:02X}: {code}", describe_access(.value))]
    DeviceRejected {
        index: u16,
        sub_index: u8,
        /// 写入的值；读取时为 `None`
        value: Option<i64>,
        code: SdoAbortCode,
    },

    #[error("Precondition failed: {0}")]
    Precondition(#[from] Precondition),

    #[error("Unexpected drive state: expected {expected}, observed {observed} (status word 0x{status_word:04X})")]
    UnexpectedState {
        expected: DriveState,
        observed: DriveState,
        status_word: u16,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] DriverError),
}

fn describe_access(value: &Option<i64>) -> String {
    match value {
        Some(value) => format!("write of {}", value),
        None => "read".to_string(),
    }
}

impl DriveError {
    /// 将寄存器访问错误映射到会话层：SDO 中止 → `DeviceRejected`
    pub(crate) fn from_access(err: DriverError, entry: &OdEntry, value: Option<i64>) -> Self {
        match err {
            DriverError::SdoAbort { code, .. } => DriveError::DeviceRejected {
                index: entry.index,
                sub_index: entry.sub_index,
                value,
                code,
            },
            other => DriveError::Transport(other),
        }
    }

    /// 中止码分类（仅 `DeviceRejected`）
    pub fn abort_category(&self) -> Option<AbortCategory> {
        match self {
            DriveError::DeviceRejected { code, .. } => Some(code.category()),
            _ => None,
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, DriveError::Precondition(_))
    }
}
