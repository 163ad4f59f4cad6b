//! 对象字典条目定义
//!
//! 本系统只访问固定的一小组对象，全部不超过 4 字节，
//! 因此所有值统一以 `i64` 表示，按条目的数据类型做小端编解码与范围检查。

use crate::{ProtocolError, require_len};

/// 对象字典基本数据类型（CiA 301 DEFTYPE 子集）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    Integer8,
    Unsigned8,
    Integer16,
    Unsigned16,
    Integer32,
    Unsigned32,
}

impl DataType {
    /// 编码后的字节数
    pub const fn size(self) -> usize {
        match self {
            DataType::Integer8 | DataType::Unsigned8 => 1,
            DataType::Integer16 | DataType::Unsigned16 => 2,
            DataType::Integer32 | DataType::Unsigned32 => 4,
        }
    }

    /// 可表示的取值范围（闭区间）
    pub const fn range(self) -> (i64, i64) {
        match self {
            DataType::Integer8 => (i8::MIN as i64, i8::MAX as i64),
            DataType::Unsigned8 => (0, u8::MAX as i64),
            DataType::Integer16 => (i16::MIN as i64, i16::MAX as i64),
            DataType::Unsigned16 => (0, u16::MAX as i64),
            DataType::Integer32 => (i32::MIN as i64, i32::MAX as i64),
            DataType::Unsigned32 => (0, u32::MAX as i64),
        }
    }

    /// 小端编码
    ///
    /// # 错误
    /// - `ProtocolError::ValueOutOfRange`: 值超出该类型的表示范围
    pub fn encode(self, value: i64) -> Result<([u8; 4], u8), ProtocolError> {
        let (min, max) = self.range();
        if value < min || value > max {
            return Err(ProtocolError::ValueOutOfRange {
                value,
                data_type: self,
            });
        }

        let mut bytes = [0u8; 4];
        let size = self.size();
        bytes[..size].copy_from_slice(&(value as u32).to_le_bytes()[..size]);
        Ok((bytes, size as u8))
    }

    /// 小端解码（有符号类型做符号扩展）
    ///
    /// # 错误
    /// - `ProtocolError::InvalidLength`: 数据不足
    pub fn decode(self, data: &[u8]) -> Result<i64, ProtocolError> {
        require_len(data, self.size())?;
        let value = match self {
            DataType::Integer8 => data[0] as i8 as i64,
            DataType::Unsigned8 => data[0] as i64,
            DataType::Integer16 => i16::from_le_bytes([data[0], data[1]]) as i64,
            DataType::Unsigned16 => u16::from_le_bytes([data[0], data[1]]) as i64,
            DataType::Integer32 => i32::from_le_bytes([data[0], data[1], data[2], data[3]]) as i64,
            DataType::Unsigned32 => u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as i64,
        };
        Ok(value)
    }
}

/// 对象字典条目（索引 + 子索引 + 类型）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OdEntry {
    /// 对象名称（与设备字典中的名称一致）
    pub name: &'static str,
    pub index: u16,
    pub sub_index: u8,
    pub data_type: DataType,
}

impl OdEntry {
    pub const fn new(name: &'static str, index: u16, sub_index: u8, data_type: DataType) -> Self {
        Self {
            name,
            index,
            sub_index,
            data_type,
        }
    }

    /// 按符号名称查找（忽略 ASCII 大小写）
    ///
    /// 只覆盖驱动协议使用的对象；PDO 通信参数按通道号访问，
    /// 见 [`OdEntry::rpdo_cob_id`] / [`OdEntry::tpdo_cob_id`]。
    pub fn by_name(name: &str) -> Option<OdEntry> {
        NAMED_ENTRIES
            .iter()
            .copied()
            .find(|entry| entry.name.eq_ignore_ascii_case(name.trim()))
    }

    /// RPDO 通信参数中的 COB-ID（0x1400 + n - 1, sub 1）
    pub const fn rpdo_cob_id(channel: u8) -> OdEntry {
        OdEntry::new(
            "COB-ID used by RPDO",
            0x1400 + (channel as u16).saturating_sub(1),
            1,
            DataType::Unsigned32,
        )
    }

    /// TPDO 通信参数中的 COB-ID（0x1800 + n - 1, sub 1）
    pub const fn tpdo_cob_id(channel: u8) -> OdEntry {
        OdEntry::new(
            "COB-ID used by TPDO",
            0x1800 + (channel as u16).saturating_sub(1),
            1,
            DataType::Unsigned32,
        )
    }

    /// TPDO 通信参数中的传输类型（0x1800 + n - 1, sub 2）
    pub const fn tpdo_transmission_type(channel: u8) -> OdEntry {
        OdEntry::new(
            "Transmission type",
            0x1800 + (channel as u16).saturating_sub(1),
            2,
            DataType::Unsigned8,
        )
    }

    pub fn encode(&self, value: i64) -> Result<([u8; 4], u8), ProtocolError> {
        self.data_type.encode(value)
    }

    pub fn decode(&self, data: &[u8]) -> Result<i64, ProtocolError> {
        self.data_type.decode(data)
    }
}

impl std::fmt::Display for OdEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (0x{:04X}:{:02X})",
            self.name, self.index, self.sub_index
        )
    }
}

pub const CONTROL_WORD: OdEntry = OdEntry::new("Control word", 0x6040, 0, DataType::Unsigned16);
pub const STATUS_WORD: OdEntry = OdEntry::new("Status word", 0x6041, 0, DataType::Unsigned16);
pub const MODES_OF_OPERATION: OdEntry =
    OdEntry::new("Modes of operation", 0x6060, 0, DataType::Integer8);
pub const ACTUAL_POSITION: OdEntry =
    OdEntry::new("Actual motor position", 0x6064, 0, DataType::Integer32);
pub const TARGET_POSITION: OdEntry =
    OdEntry::new("Profile target position", 0x607A, 0, DataType::Integer32);
pub const PROFILE_VELOCITY: OdEntry =
    OdEntry::new("Profile target velocity", 0x6081, 0, DataType::Integer32);
pub const PROFILE_ACCELERATION: OdEntry =
    OdEntry::new("Profile target acceleration", 0x6083, 0, DataType::Unsigned32);
pub const PROFILE_DECELERATION: OdEntry =
    OdEntry::new("Profile target deceleration", 0x6084, 0, DataType::Unsigned32);
pub const HOMING_METHOD: OdEntry = OdEntry::new("Homing method", 0x6098, 0, DataType::Integer8);

const NAMED_ENTRIES: [OdEntry; 9] = [
    CONTROL_WORD,
    STATUS_WORD,
    MODES_OF_OPERATION,
    ACTUAL_POSITION,
    TARGET_POSITION,
    PROFILE_VELOCITY,
    PROFILE_ACCELERATION,
    PROFILE_DECELERATION,
    HOMING_METHOD,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name_matches_dictionary_names() {
        assert_eq!(OdEntry::by_name("Control word"), Some(CONTROL_WORD));
        assert_eq!(OdEntry::by_name("status WORD"), Some(STATUS_WORD));
        assert_eq!(OdEntry::by_name(" Homing method "), Some(HOMING_METHOD));
        assert_eq!(OdEntry::by_name("Halt option code"), None);
    }

    #[test]
    fn test_pdo_parameter_indices() {
        assert_eq!(OdEntry::rpdo_cob_id(1).index, 0x1400);
        assert_eq!(OdEntry::rpdo_cob_id(3).index, 0x1402);
        assert_eq!(OdEntry::tpdo_cob_id(2).index, 0x1801);
        assert_eq!(OdEntry::tpdo_transmission_type(1).sub_index, 2);
    }

    #[test]
    fn test_encode_little_endian() {
        let (bytes, len) = TARGET_POSITION.encode(50000).unwrap();
        assert_eq!(len, 4);
        assert_eq!(bytes, [0x50, 0xC3, 0x00, 0x00]);

        let (bytes, len) = TARGET_POSITION.encode(-1).unwrap();
        assert_eq!(len, 4);
        assert_eq!(bytes, [0xFF, 0xFF, 0xFF, 0xFF]);

        let (bytes, len) = CONTROL_WORD.encode(0x1F).unwrap();
        assert_eq!(len, 2);
        assert_eq!(&bytes[..2], &[0x1F, 0x00]);
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert!(matches!(
            MODES_OF_OPERATION.encode(200),
            Err(ProtocolError::ValueOutOfRange { value: 200, .. })
        ));
        assert!(PROFILE_ACCELERATION.encode(-5).is_err());
        assert!(PROFILE_ACCELERATION.encode(u32::MAX as i64).is_ok());
    }

    #[test]
    fn test_decode_sign_extension() {
        assert_eq!(MODES_OF_OPERATION.decode(&[0xFF]).unwrap(), -1);
        assert_eq!(DataType::Unsigned8.decode(&[0xFF]).unwrap(), 255);
        assert_eq!(
            ACTUAL_POSITION.decode(&[0xB0, 0x3C, 0xFF, 0xFF]).unwrap(),
            -50000
        );
        assert_eq!(
            PROFILE_DECELERATION
                .decode(&[0x00, 0x00, 0x00, 0x80])
                .unwrap(),
            0x8000_0000
        );
    }

    #[test]
    fn test_decode_short_data() {
        assert!(matches!(
            STATUS_WORD.decode(&[0x27]),
            Err(ProtocolError::InvalidLength {
                expected: 2,
                actual: 1
            })
        ));
    }
}
