//! 网络管理 (NMT) 与预定义连接集 COB-ID

use crate::{CanopenFrame, ProtocolError, require_len};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// NMT 命令帧 ID
pub const NMT_COB_ID: u16 = 0x000;

/// NMT 广播目标节点号
pub const BROADCAST_NODE: u8 = 0;

/// SDO 请求（客户端 → 服务器）：0x600 + node
pub const fn sdo_request_cob_id(node_id: u8) -> u16 {
    0x600 + node_id as u16
}

/// SDO 响应（服务器 → 客户端）：0x580 + node
pub const fn sdo_response_cob_id(node_id: u8) -> u16 {
    0x580 + node_id as u16
}

/// NMT 错误控制（bootup / heartbeat）：0x700 + node
pub const fn nmt_error_control_cob_id(node_id: u8) -> u16 {
    0x700 + node_id as u16
}

/// 节点号合法范围 1..=127
pub fn validate_node_id(node_id: u8) -> Result<u8, ProtocolError> {
    if (1..=127).contains(&node_id) {
        Ok(node_id)
    } else {
        Err(ProtocolError::InvalidValue {
            field: "node_id",
            value: node_id as i64,
        })
    }
}

/// NMT 命令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum NmtCommand {
    StartRemoteNode = 0x01,
    StopRemoteNode = 0x02,
    EnterPreOperational = 0x80,
    ResetNode = 0x81,
    ResetCommunication = 0x82,
}

impl NmtCommand {
    /// 构建 NMT 帧（`node_id == 0` 为广播）
    pub fn to_frame(self, node_id: u8) -> CanopenFrame {
        CanopenFrame::new_standard(NMT_COB_ID, &[u8::from(self), node_id])
    }

    /// 解析 NMT 帧，返回 (命令, 目标节点)
    pub fn parse(frame: &CanopenFrame) -> Result<(NmtCommand, u8), ProtocolError> {
        if frame.id != NMT_COB_ID as u32 {
            return Err(ProtocolError::InvalidCanId { id: frame.id });
        }
        let data = frame.data_slice();
        require_len(data, 2)?;
        let command = NmtCommand::try_from(data[0]).map_err(|_| ProtocolError::InvalidValue {
            field: "nmt_command",
            value: data[0] as i64,
        })?;
        Ok((command, data[1]))
    }
}

/// NMT 节点状态（错误控制报文的第 1 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum NmtState {
    BootUp = 0x00,
    Stopped = 0x04,
    Operational = 0x05,
    PreOperational = 0x7F,
}

impl NmtState {
    /// 构建错误控制报文（bootup / heartbeat）
    pub fn to_frame(self, node_id: u8) -> CanopenFrame {
        CanopenFrame::new_standard(nmt_error_control_cob_id(node_id), &[u8::from(self)])
    }

    /// 解析错误控制报文，返回 (节点号, 状态)
    pub fn parse(frame: &CanopenFrame) -> Option<(u8, NmtState)> {
        if !(0x701..=0x77F).contains(&frame.id) || frame.len == 0 {
            return None;
        }
        let node_id = (frame.id - 0x700) as u8;
        // 最高位为 heartbeat toggle 位
        let state = NmtState::try_from(frame.data[0] & 0x7F).ok()?;
        Some((node_id, state))
    }
}
