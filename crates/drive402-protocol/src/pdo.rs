//! PDO 通道、COB-ID 与帧布局
//!
//! 映射固定，不做动态 PDO 映射：
//!
//! | 通道  | 方向 | 默认 COB-ID  | 内容 |
//! |-------|------|--------------|------|
//! | RPDO1 | 主站 → 设备 | 0x200 + node | 控制字 (u16) |
//! | RPDO2 | 主站 → 设备 | 0x300 + node | 控制字 (u16) + 运行模式 (i8) |
//! | RPDO3 | 主站 → 设备 | 0x400 + node | 控制字 (u16) + 目标位置 (i32) |
//! | TPDO1 | 设备 → 主站 | 0x180 + node | 状态字 (u16) |
//! | TPDO2 | 设备 → 主站 | 0x280 + node | 状态字 (u16) + 实际位置 (i32) |

use crate::{CanopenFrame, ProtocolError, require_len};

/// COB-ID 最高位：置位表示 PDO 无效（禁用）
pub const COB_ID_DISABLE_BIT: u32 = 0x8000_0000;

/// 传输类型 254：事件驱动（厂商定义）
pub const TRANSMISSION_TYPE_EVENT_DRIVEN: u8 = 254;

/// 传输类型 255：事件驱动（设备子协议定义），多数设备的出厂默认值
pub const TRANSMISSION_TYPE_DEVICE_PROFILE: u8 = 255;

/// PDO 通信参数中的 COB-ID 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PdoCobId(pub u32);

impl PdoCobId {
    pub fn is_disabled(self) -> bool {
        self.0 & COB_ID_DISABLE_BIT != 0
    }

    /// 置位 bit31
    pub fn disabled(self) -> Self {
        PdoCobId(self.0 | COB_ID_DISABLE_BIT)
    }

    /// 清除 bit31
    pub fn enabled(self) -> Self {
        PdoCobId(self.0 & !COB_ID_DISABLE_BIT)
    }

    /// 11 位 CAN ID
    pub fn can_id(self) -> u16 {
        (self.0 & 0x7FF) as u16
    }
}

/// 接收 PDO 通道（主站发送）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpdoChannel {
    /// RPDO1：控制字
    Control = 1,
    /// RPDO2：控制字 + 运行模式
    ControlMode = 2,
    /// RPDO3：控制字 + 目标位置
    ControlTarget = 3,
}

impl RpdoChannel {
    pub const ALL: [RpdoChannel; 3] = [
        RpdoChannel::Control,
        RpdoChannel::ControlMode,
        RpdoChannel::ControlTarget,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn default_cob_id(self, node_id: u8) -> PdoCobId {
        PdoCobId(0x100 + 0x100 * self.number() as u32 + node_id as u32)
    }

    pub fn from_number(number: u8) -> Option<Self> {
        RpdoChannel::ALL.into_iter().find(|c| c.number() == number)
    }
}

/// 发送 PDO 通道（设备发送）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TpdoChannel {
    /// TPDO1：状态字
    Status = 1,
    /// TPDO2：状态字 + 实际位置
    StatusPosition = 2,
}

impl TpdoChannel {
    pub const ALL: [TpdoChannel; 2] = [TpdoChannel::Status, TpdoChannel::StatusPosition];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn default_cob_id(self, node_id: u8) -> PdoCobId {
        PdoCobId(0x80 + 0x100 * self.number() as u32 + node_id as u32)
    }

    pub fn from_number(number: u8) -> Option<Self> {
        TpdoChannel::ALL.into_iter().find(|c| c.number() == number)
    }
}

/// RPDO 载荷：控制字 + 可选的辅助字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RpdoPayload {
    pub control_word: u16,
    pub mode: Option<i8>,
    pub target: Option<i32>,
}

impl RpdoPayload {
    /// 按通道布局编码，返回 (数据, 长度)
    pub fn encode(&self, channel: RpdoChannel) -> ([u8; 8], usize) {
        let mut data = [0u8; 8];
        data[..2].copy_from_slice(&self.control_word.to_le_bytes());
        let len = match channel {
            RpdoChannel::Control => 2,
            RpdoChannel::ControlMode => {
                data[2] = self.mode.unwrap_or_default() as u8;
                3
            },
            RpdoChannel::ControlTarget => {
                data[2..6].copy_from_slice(&self.target.unwrap_or_default().to_le_bytes());
                6
            },
        };
        (data, len)
    }

    /// 按通道布局解码（设备侧使用）
    pub fn decode(channel: RpdoChannel, data: &[u8]) -> Result<Self, ProtocolError> {
        let control_word = {
            require_len(data, 2)?;
            u16::from_le_bytes([data[0], data[1]])
        };
        match channel {
            RpdoChannel::Control => Ok(RpdoPayload {
                control_word,
                ..Default::default()
            }),
            RpdoChannel::ControlMode => {
                require_len(data, 3)?;
                Ok(RpdoPayload {
                    control_word,
                    mode: Some(data[2] as i8),
                    target: None,
                })
            },
            RpdoChannel::ControlTarget => {
                require_len(data, 6)?;
                Ok(RpdoPayload {
                    control_word,
                    mode: None,
                    target: Some(i32::from_le_bytes([data[2], data[3], data[4], data[5]])),
                })
            },
        }
    }
}

/// 本地 RPDO 帧镜像
///
/// 保存三个 RPDO 通道的 COB-ID 与映射字段的当前值；
/// 写入字段后由调用方选择通道发送。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpdoImage {
    cob_ids: [PdoCobId; 3],
    control_word: u16,
    mode: i8,
    target: i32,
}

impl RpdoImage {
    /// 以预定义连接集的默认 COB-ID 创建
    pub fn with_defaults(node_id: u8) -> Self {
        Self {
            cob_ids: RpdoChannel::ALL.map(|c| c.default_cob_id(node_id)),
            control_word: 0,
            mode: 0,
            target: 0,
        }
    }

    pub fn cob_id(&self, channel: RpdoChannel) -> PdoCobId {
        self.cob_ids[channel.number() as usize - 1]
    }

    /// 用设备上读回的 COB-ID 刷新
    pub fn set_cob_id(&mut self, channel: RpdoChannel, cob_id: PdoCobId) {
        self.cob_ids[channel.number() as usize - 1] = cob_id;
    }

    pub fn set_control_word(&mut self, control_word: u16) {
        self.control_word = control_word;
    }

    pub fn set_mode(&mut self, mode: i8) {
        self.mode = mode;
    }

    pub fn set_target(&mut self, target: i32) {
        self.target = target;
    }

    pub fn control_word(&self) -> u16 {
        self.control_word
    }

    /// 生成指定通道的帧
    ///
    /// # 错误
    /// - `ProtocolError::PdoDisabled`: 通道 COB-ID 的 bit31 置位
    pub fn frame(&self, channel: RpdoChannel) -> Result<CanopenFrame, ProtocolError> {
        let cob_id = self.cob_id(channel);
        if cob_id.is_disabled() {
            return Err(ProtocolError::PdoDisabled {
                channel: channel.number(),
                cob_id: cob_id.0,
            });
        }
        let payload = RpdoPayload {
            control_word: self.control_word,
            mode: Some(self.mode),
            target: Some(self.target),
        };
        let (data, len) = payload.encode(channel);
        Ok(CanopenFrame::new_standard(cob_id.can_id(), &data[..len]))
    }
}

/// 一次 TPDO 遥测观测
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpdoSample {
    pub status_word: u16,
    /// 仅 TPDO2 携带位置
    pub position: Option<i32>,
}

impl TpdoSample {
    /// 解码遥测帧
    ///
    /// - TPDO1：u16 小端状态字
    /// - TPDO2：u16 小端状态字 + i32 小端位置
    pub fn decode(channel: TpdoChannel, data: &[u8]) -> Result<Self, ProtocolError> {
        match channel {
            TpdoChannel::Status => {
                require_len(data, 2)?;
                Ok(TpdoSample {
                    status_word: u16::from_le_bytes([data[0], data[1]]),
                    position: None,
                })
            },
            TpdoChannel::StatusPosition => {
                require_len(data, 6)?;
                Ok(TpdoSample {
                    status_word: u16::from_le_bytes([data[0], data[1]]),
                    position: Some(i32::from_le_bytes([data[2], data[3], data[4], data[5]])),
                })
            },
        }
    }

    /// 编码遥测帧（设备侧使用）
    pub fn to_frame(&self, channel: TpdoChannel, cob_id: PdoCobId) -> CanopenFrame {
        let mut data = [0u8; 6];
        data[..2].copy_from_slice(&self.status_word.to_le_bytes());
        let len = match channel {
            TpdoChannel::Status => 2,
            TpdoChannel::StatusPosition => {
                data[2..6].copy_from_slice(&self.position.unwrap_or_default().to_le_bytes());
                6
            },
        };
        CanopenFrame::new_standard(cob_id.can_id(), &data[..len])
    }
}
