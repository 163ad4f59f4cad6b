//! 节点客户端错误类型定义

use drive402_can::CanError;
use drive402_protocol::{ProtocolError, SdoAbortCode};
use std::time::Duration;
use thiserror::Error;

/// 节点客户端错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// CAN 驱动错误
    #[error("CAN driver error: {0}")]
    Can(#[from] CanError),

    /// 协议编解码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 设备以 SDO 中止应答
    #[error("SDO abort on 0x{index:04X}:{sub_index:02X}: {code}")]
    SdoAbort {
        index: u16,
        sub_index: u8,
        code: SdoAbortCode,
    },

    /// SDO 在超时时间内无应答
    #[error("SDO timeout on 0x{index:04X}:{sub_index:02X} after {timeout:?}")]
    SdoTimeout {
        index: u16,
        sub_index: u8,
        timeout: Duration,
    },

    /// 复位后未收到 bootup 报文
    #[error("No bootup message from node {node_id} within {timeout:?}")]
    BootupTimeout { node_id: u8, timeout: Duration },

    /// 应答类型与请求不匹配
    #[error("Unexpected SDO response for 0x{index:04X}:{sub_index:02X}: {detail}")]
    UnexpectedResponse {
        index: u16,
        sub_index: u8,
        detail: String,
    },

    /// 接收线程已退出
    #[error("RX channel closed")]
    ChannelClosed,
}

impl DriverError {
    /// SDO 中止码（若为中止错误）
    pub fn abort_code(&self) -> Option<SdoAbortCode> {
        match self {
            DriverError::SdoAbort { code, .. } => Some(*code),
            _ => None,
        }
    }
}
