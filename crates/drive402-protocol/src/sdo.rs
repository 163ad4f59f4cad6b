//! 加速 SDO（expedited transfer）帧编解码
//!
//! 只实现不超过 4 字节的加速传输：驱动协议用到的对象全部在此范围内。
//! 分段 / 块传输不支持，收到时返回 `ProtocolError::UnsupportedSdo`。
//!
//! 帧布局（8 字节）：
//!
//! ```text
//! byte 0     命令字（ccs/scs, n, e, s）
//! byte 1-2   索引（小端）
//! byte 3     子索引
//! byte 4-7   数据 / 中止码（小端）
//! ```

use crate::{CanopenFrame, ProtocolError, require_len, sdo_request_cob_id, sdo_response_cob_id};

const CCS_DOWNLOAD: u8 = 1;
const CCS_UPLOAD: u8 = 2;
const SCS_UPLOAD: u8 = 2;
const SCS_DOWNLOAD: u8 = 3;
const CS_ABORT: u8 = 4;

/// 加速传输命令字：n（未使用字节数）| e | s
fn expedited_command(specifier: u8, len: u8) -> u8 {
    let unused = 4u8.saturating_sub(len.clamp(1, 4));
    (specifier << 5) | (unused << 2) | 0x03
}

fn header(command: u8, index: u16, sub_index: u8) -> [u8; 8] {
    let index = index.to_le_bytes();
    [command, index[0], index[1], sub_index, 0, 0, 0, 0]
}

fn split_header(data: &[u8]) -> (u8, u16, u8) {
    (data[0], u16::from_le_bytes([data[1], data[2]]), data[3])
}

/// 从加速传输命令字中取有效数据长度
fn expedited_len(command: u8) -> Result<u8, ProtocolError> {
    let expedited = command & 0x02 != 0;
    let size_indicated = command & 0x01 != 0;
    if !expedited {
        return Err(ProtocolError::UnsupportedSdo { command });
    }
    if size_indicated {
        Ok(4 - ((command >> 2) & 0x03))
    } else {
        Ok(4)
    }
}

/// 客户端请求（主站 → 设备，COB-ID 0x600 + node）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoRequest {
    Upload {
        index: u16,
        sub_index: u8,
    },
    Download {
        index: u16,
        sub_index: u8,
        data: [u8; 4],
        len: u8,
    },
    Abort {
        index: u16,
        sub_index: u8,
        code: SdoAbortCode,
    },
}

impl SdoRequest {
    pub fn to_frame(&self, node_id: u8) -> CanopenFrame {
        let payload = match *self {
            SdoRequest::Upload { index, sub_index } => {
                header(CCS_UPLOAD << 5, index, sub_index)
            },
            SdoRequest::Download {
                index,
                sub_index,
                data,
                len,
            } => {
                let mut bytes = header(expedited_command(CCS_DOWNLOAD, len), index, sub_index);
                bytes[4..8].copy_from_slice(&data);
                bytes
            },
            SdoRequest::Abort {
                index,
                sub_index,
                code,
            } => {
                let mut bytes = header(CS_ABORT << 5, index, sub_index);
                bytes[4..8].copy_from_slice(&code.0.to_le_bytes());
                bytes
            },
        };
        CanopenFrame::new_standard(sdo_request_cob_id(node_id), &payload)
    }

    /// 解析请求帧（设备侧使用）
    pub fn parse(frame: &CanopenFrame) -> Result<Self, ProtocolError> {
        let data = frame.data_slice();
        require_len(data, 8)?;
        let (command, index, sub_index) = split_header(data);

        match command >> 5 {
            CCS_UPLOAD => Ok(SdoRequest::Upload { index, sub_index }),
            CCS_DOWNLOAD => {
                let len = expedited_len(command)?;
                let mut payload = [0u8; 4];
                payload.copy_from_slice(&data[4..8]);
                Ok(SdoRequest::Download {
                    index,
                    sub_index,
                    data: payload,
                    len,
                })
            },
            CS_ABORT => Ok(SdoRequest::Abort {
                index,
                sub_index,
                code: SdoAbortCode(u32::from_le_bytes([data[4], data[5], data[6], data[7]])),
            }),
            _ => Err(ProtocolError::UnsupportedSdo { command }),
        }
    }
}

/// 服务器响应（设备 → 主站，COB-ID 0x580 + node）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoResponse {
    Upload {
        index: u16,
        sub_index: u8,
        data: [u8; 4],
        len: u8,
    },
    DownloadAck {
        index: u16,
        sub_index: u8,
    },
    Abort {
        index: u16,
        sub_index: u8,
        code: SdoAbortCode,
    },
}

impl SdoResponse {
    /// 响应所对应的 (索引, 子索引)
    pub fn address(&self) -> (u16, u8) {
        match *self {
            SdoResponse::Upload {
                index, sub_index, ..
            }
            | SdoResponse::DownloadAck { index, sub_index }
            | SdoResponse::Abort {
                index, sub_index, ..
            } => (index, sub_index),
        }
    }

    pub fn to_frame(&self, node_id: u8) -> CanopenFrame {
        let payload = match *self {
            SdoResponse::Upload {
                index,
                sub_index,
                data,
                len,
            } => {
                let mut bytes = header(expedited_command(SCS_UPLOAD, len), index, sub_index);
                bytes[4..8].copy_from_slice(&data);
                bytes
            },
            SdoResponse::DownloadAck { index, sub_index } => {
                header(SCS_DOWNLOAD << 5, index, sub_index)
            },
            SdoResponse::Abort {
                index,
                sub_index,
                code,
            } => {
                let mut bytes = header(CS_ABORT << 5, index, sub_index);
                bytes[4..8].copy_from_slice(&code.0.to_le_bytes());
                bytes
            },
        };
        CanopenFrame::new_standard(sdo_response_cob_id(node_id), &payload)
    }

    /// 解析响应帧（主站侧使用）
    pub fn parse(frame: &CanopenFrame) -> Result<Self, ProtocolError> {
        let data = frame.data_slice();
        require_len(data, 8)?;
        let (command, index, sub_index) = split_header(data);

        match command >> 5 {
            SCS_UPLOAD => {
                let len = expedited_len(command)?;
                let mut payload = [0u8; 4];
                payload.copy_from_slice(&data[4..8]);
                Ok(SdoResponse::Upload {
                    index,
                    sub_index,
                    data: payload,
                    len,
                })
            },
            SCS_DOWNLOAD => Ok(SdoResponse::DownloadAck { index, sub_index }),
            CS_ABORT => Ok(SdoResponse::Abort {
                index,
                sub_index,
                code: SdoAbortCode(u32::from_le_bytes([data[4], data[5], data[6], data[7]])),
            }),
            _ => Err(ProtocolError::UnsupportedSdo { command }),
        }
    }
}

/// SDO 中止码（CiA 301 §7.2.4.3.17）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SdoAbortCode(pub u32);

/// 中止码的用户可见分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbortCategory {
    /// 当前状态下不允许该操作（取值越界、设备状态不允许）
    NotPermittedNow,
    /// 对象或子索引不存在
    NoSuchObject,
    /// 访问权限不符（只读 / 只写）
    AccessDenied,
    /// 协议层错误（超时、命令字非法、长度不符）
    Protocol,
    Other,
}

impl SdoAbortCode {
    pub const TOGGLE_BIT: SdoAbortCode = SdoAbortCode(0x0503_0000);
    pub const PROTOCOL_TIMEOUT: SdoAbortCode = SdoAbortCode(0x0504_0000);
    pub const INVALID_COMMAND: SdoAbortCode = SdoAbortCode(0x0504_0001);
    pub const UNSUPPORTED_ACCESS: SdoAbortCode = SdoAbortCode(0x0601_0000);
    pub const WRITE_ONLY: SdoAbortCode = SdoAbortCode(0x0601_0001);
    pub const READ_ONLY: SdoAbortCode = SdoAbortCode(0x0601_0002);
    pub const OBJECT_NOT_FOUND: SdoAbortCode = SdoAbortCode(0x0602_0000);
    pub const LENGTH_MISMATCH: SdoAbortCode = SdoAbortCode(0x0607_0010);
    pub const SUB_INDEX_NOT_FOUND: SdoAbortCode = SdoAbortCode(0x0609_0011);
    pub const VALUE_RANGE_EXCEEDED: SdoAbortCode = SdoAbortCode(0x0609_0030);
    pub const VALUE_TOO_HIGH: SdoAbortCode = SdoAbortCode(0x0609_0031);
    pub const VALUE_TOO_LOW: SdoAbortCode = SdoAbortCode(0x0609_0032);
    pub const GENERAL_ERROR: SdoAbortCode = SdoAbortCode(0x0800_0000);
    pub const DATA_TRANSFER: SdoAbortCode = SdoAbortCode(0x0800_0020);
    pub const LOCAL_CONTROL: SdoAbortCode = SdoAbortCode(0x0800_0021);
    pub const INVALID_DEVICE_STATE: SdoAbortCode = SdoAbortCode(0x0800_0022);

    pub fn category(self) -> AbortCategory {
        match self {
            SdoAbortCode::VALUE_RANGE_EXCEEDED
            | SdoAbortCode::VALUE_TOO_HIGH
            | SdoAbortCode::VALUE_TOO_LOW
            | SdoAbortCode::LOCAL_CONTROL
            | SdoAbortCode::INVALID_DEVICE_STATE => AbortCategory::NotPermittedNow,
            SdoAbortCode::OBJECT_NOT_FOUND | SdoAbortCode::SUB_INDEX_NOT_FOUND => {
                AbortCategory::NoSuchObject
            },
            SdoAbortCode::UNSUPPORTED_ACCESS | SdoAbortCode::WRITE_ONLY | SdoAbortCode::READ_ONLY => {
                AbortCategory::AccessDenied
            },
            SdoAbortCode::TOGGLE_BIT
            | SdoAbortCode::PROTOCOL_TIMEOUT
            | SdoAbortCode::INVALID_COMMAND
            | SdoAbortCode::LENGTH_MISMATCH => AbortCategory::Protocol,
            _ => AbortCategory::Other,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            SdoAbortCode::TOGGLE_BIT => "Toggle bit not alternated",
            SdoAbortCode::PROTOCOL_TIMEOUT => "SDO protocol timed out",
            SdoAbortCode::INVALID_COMMAND => "Client/server command specifier not valid",
            SdoAbortCode::UNSUPPORTED_ACCESS => "Unsupported access to an object",
            SdoAbortCode::WRITE_ONLY => "Attempt to read a write only object",
            SdoAbortCode::READ_ONLY => "Attempt to write a read only object",
            SdoAbortCode::OBJECT_NOT_FOUND => "Object does not exist in the object dictionary",
            SdoAbortCode::LENGTH_MISMATCH => "Data type does not match, length does not match",
            SdoAbortCode::SUB_INDEX_NOT_FOUND => "Sub-index does not exist",
            SdoAbortCode::VALUE_RANGE_EXCEEDED => "Value range of parameter exceeded",
            SdoAbortCode::VALUE_TOO_HIGH => "Value of parameter written too high",
            SdoAbortCode::VALUE_TOO_LOW => "Value of parameter written too low",
            SdoAbortCode::GENERAL_ERROR => "General error",
            SdoAbortCode::DATA_TRANSFER => "Data cannot be transferred or stored",
            SdoAbortCode::LOCAL_CONTROL => {
                "Data cannot be transferred or stored because of local control"
            },
            SdoAbortCode::INVALID_DEVICE_STATE => {
                "Data cannot be transferred or stored because of the present device state"
            },
            _ => "Unknown abort code",
        }
    }
}

impl std::fmt::Display for SdoAbortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X} ({})", self.0, self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_request_layout() {
        let frame = SdoRequest::Upload {
            index: 0x6041,
            sub_index: 0,
        }
        .to_frame(2);
        assert_eq!(frame.id, 0x602);
        assert_eq!(frame.data, [0x40, 0x41, 0x60, 0x00, 0, 0, 0, 0]);
    }

    #[test]
    fn test_download_command_specifiers() {
        let cases = [(1u8, 0x2Fu8), (2, 0x2B), (4, 0x23)];
        for (len, expected) in cases {
            let frame = SdoRequest::Download {
                index: 0x6040,
                sub_index: 0,
                data: [0x0F, 0, 0, 0],
                len,
            }
            .to_frame(2);
            assert_eq!(frame.data[0], expected, "len = {}", len);
            assert_eq!(SdoRequest::parse(&frame).unwrap(), SdoRequest::Download {
                index: 0x6040,
                sub_index: 0,
                data: [0x0F, 0, 0, 0],
                len,
            });
        }
    }

    #[test]
    fn test_parse_upload_response() {
        // 0x4B：2 字节加速上传
        let frame = CanopenFrame::new_standard(0x582, &[0x4B, 0x41, 0x60, 0x00, 0x27, 0x04, 0, 0]);
        let response = SdoResponse::parse(&frame).unwrap();
        assert_eq!(response, SdoResponse::Upload {
            index: 0x6041,
            sub_index: 0,
            data: [0x27, 0x04, 0, 0],
            len: 2,
        });
        assert_eq!(response.address(), (0x6041, 0));
    }

    #[test]
    fn test_parse_abort_response() {
        let frame = CanopenFrame::new_standard(0x582, &[
            0x80, 0x7A, 0x60, 0x00, 0x22, 0x00, 0x00, 0x08,
        ]);
        match SdoResponse::parse(&frame).unwrap() {
            SdoResponse::Abort {
                index,
                sub_index,
                code,
            } => {
                assert_eq!(index, 0x607A);
                assert_eq!(sub_index, 0);
                assert_eq!(code, SdoAbortCode::INVALID_DEVICE_STATE);
            },
            other => panic!("Expected abort, got {:?}", other),
        }
    }

    #[test]
    fn test_segmented_upload_is_unsupported() {
        // e = 0, s = 1：分段上传初始化
        let frame = CanopenFrame::new_standard(0x582, &[0x41, 0x08, 0x10, 0x00, 0x10, 0, 0, 0]);
        assert_eq!(
            SdoResponse::parse(&frame),
            Err(ProtocolError::UnsupportedSdo { command: 0x41 })
        );
    }

    #[test]
    fn test_short_frame_rejected() {
        let frame = CanopenFrame::new_standard(0x582, &[0x60, 0x40, 0x60]);
        assert!(matches!(
            SdoResponse::parse(&frame),
            Err(ProtocolError::InvalidLength { expected: 8, .. })
        ));
    }

    #[test]
    fn test_abort_categories() {
        assert_eq!(
            SdoAbortCode::VALUE_RANGE_EXCEEDED.category(),
            AbortCategory::NotPermittedNow
        );
        assert_eq!(
            SdoAbortCode::INVALID_DEVICE_STATE.category(),
            AbortCategory::NotPermittedNow
        );
        assert_eq!(
            SdoAbortCode::OBJECT_NOT_FOUND.category(),
            AbortCategory::NoSuchObject
        );
        assert_eq!(SdoAbortCode(0x1234_5678).category(), AbortCategory::Other);
        assert_eq!(
            SdoAbortCode::VALUE_RANGE_EXCEEDED.to_string(),
            "0x06090030 (Value range of parameter exceeded)"
        );
    }
}
