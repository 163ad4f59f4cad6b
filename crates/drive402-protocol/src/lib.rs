//! # drive402 Protocol
//!
//! CANopen / CiA 402 协议编码（无硬件依赖）
//!
//! ## 模块
//!
//! - `od`: 对象字典条目（索引、子索引、数据类型）
//! - `control`: 控制字 (0x6040) 位域与命令值
//! - `status`: 状态字 (0x6041) 位域与 PDS 状态推导
//! - `mode`: 运行模式 (0x6060)
//! - `nmt`: 网络管理命令与 COB-ID 约定
//! - `sdo`: 加速 SDO（expedited）帧编解码与中止码
//! - `pdo`: PDO 通道、COB-ID 与遥测帧解码
//!
//! ## 字节序
//!
//! CANopen 所有多字节字段均为小端字节序（LSB 在前）。

pub mod control;
pub mod mode;
pub mod nmt;
pub mod od;
pub mod pdo;
pub mod sdo;
pub mod status;

pub use control::*;
pub use mode::*;
pub use nmt::*;
pub use od::*;
pub use pdo::*;
pub use sdo::*;
pub use status::*;

use thiserror::Error;

/// CAN 2.0 标准帧
///
/// 协议层和 CAN 适配层之间的中间抽象：协议层只构建/解析 `CanopenFrame`，
/// 不依赖具体的 CAN 实现（SocketCAN 或模拟总线）。
///
/// 固定 8 字节数据，`Copy` 语义，无堆分配。
///
/// ```rust
/// use drive402_protocol::CanopenFrame;
///
/// let frame = CanopenFrame::new_standard(0x602, &[0x40, 0x41, 0x60, 0x00]);
/// assert_eq!(frame.id(), 0x602);
/// assert_eq!(frame.data_slice(), &[0x40, 0x41, 0x60, 0x00]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanopenFrame {
    /// CAN ID
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,

    /// 是否为扩展帧（29-bit ID），CANopen 只使用标准帧
    pub is_extended: bool,

    /// 接收时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl CanopenFrame {
    /// 创建标准帧（超过 8 字节的数据会被截断）
    pub fn new_standard(id: u16, data: &[u8]) -> Self {
        let mut fixed = [0u8; 8];
        let len = data.len().min(8);
        fixed[..len].copy_from_slice(&data[..len]);

        Self {
            id: id as u32,
            data: fixed,
            len: len as u8,
            is_extended: false,
            timestamp_us: 0,
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(8)]
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// 协议编解码错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid CAN ID: 0x{id:X}")]
    InvalidCanId { id: u32 },

    #[error("Unsupported SDO command specifier: 0x{command:02X}")]
    UnsupportedSdo { command: u8 },

    #[error("Value {value} does not fit data type {data_type:?}")]
    ValueOutOfRange { value: i64, data_type: DataType },

    #[error("PDO channel {channel} is disabled (COB-ID 0x{cob_id:08X})")]
    PdoDisabled { channel: u8, cob_id: u32 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: &'static str, value: i64 },
}

/// 检查数据长度是否至少为 `expected`
pub(crate) fn require_len(data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() < expected {
        return Err(ProtocolError::InvalidLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}
