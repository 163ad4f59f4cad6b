//! 传输分发
//!
//! 同一个命令帧可以经两种路径送达设备：
//!
//! | 路径 | 写入方式 | 完成信号 |
//! |---|---|---|
//! | SDO | 每个字段一次确认写入，辅助字段先于控制字 | 设备确认 |
//! | PDO | 写入本地 RPDO 镜像后立即发送该通道 | 固定延时 |
//!
//! 通道映射固定：RPDO1 = 控制字，RPDO2 = 控制字 + 运行模式，
//! RPDO3 = 控制字 + 目标位置。

use crate::{DriveError, Settle, SettleDelays};
use drive402_driver::NodeClient;
use drive402_protocol::{
    CONTROL_WORD, MODES_OF_OPERATION, PdoCobId, RpdoChannel, RpdoImage, TARGET_POSITION,
};
use std::time::Duration;
use tracing::trace;

/// 会话级传输模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TransportMode {
    #[default]
    Sdo,
    Pdo,
}

impl TransportMode {
    pub fn name(self) -> &'static str {
        match self {
            TransportMode::Sdo => "SDO",
            TransportMode::Pdo => "PDO",
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sdo" => Ok(TransportMode::Sdo),
            "pdo" => Ok(TransportMode::Pdo),
            other => Err(format!("unknown transport '{}', expected 'sdo' or 'pdo'", other)),
        }
    }
}

/// 一次命令写入（控制字 + 可选辅助字段）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFrame {
    /// RPDO1
    Control { control_word: u16 },
    /// RPDO2
    ControlWithMode { control_word: u16, mode: i8 },
    /// RPDO3；`target` 为 `None` 时沿用已锁存的目标
    ControlWithTarget {
        control_word: u16,
        target: Option<i32>,
    },
}

impl CommandFrame {
    pub fn control_word(&self) -> u16 {
        match *self {
            CommandFrame::Control { control_word }
            | CommandFrame::ControlWithMode { control_word, .. }
            | CommandFrame::ControlWithTarget { control_word, .. } => control_word,
        }
    }

    pub fn channel(&self) -> RpdoChannel {
        match self {
            CommandFrame::Control { .. } => RpdoChannel::Control,
            CommandFrame::ControlWithMode { .. } => RpdoChannel::ControlMode,
            CommandFrame::ControlWithTarget { .. } => RpdoChannel::ControlTarget,
        }
    }
}

/// 命令写入路径
pub trait CommandTransport: Send {
    fn mode(&self) -> TransportMode;

    /// 写入一个命令帧，然后等待 `settle` 对应的时间
    fn write_command(
        &mut self,
        node: &dyn NodeClient,
        frame: CommandFrame,
        settle: Settle,
    ) -> Result<(), DriveError>;
}

fn settle_for(delay: Duration) {
    if !delay.is_zero() {
        spin_sleep::sleep(delay);
    }
}

fn sdo_write(
    node: &dyn NodeClient,
    entry: &drive402_protocol::OdEntry,
    value: i64,
) -> Result<(), DriveError> {
    node.sdo_write(entry, value)
        .map_err(|e| DriveError::from_access(e, entry, Some(value)))
}

/// 确认式 SDO 路径：每次写入都等待设备应答，不做步间等待
#[derive(Debug, Clone, Default)]
pub struct SdoTransport;

impl SdoTransport {
    pub fn new() -> Self {
        Self
    }
}

impl CommandTransport for SdoTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Sdo
    }

    fn write_command(
        &mut self,
        node: &dyn NodeClient,
        frame: CommandFrame,
        _settle: Settle,
    ) -> Result<(), DriveError> {
        match frame {
            CommandFrame::ControlWithMode { mode, .. } => {
                sdo_write(node, &MODES_OF_OPERATION, mode as i64)?;
            },
            CommandFrame::ControlWithTarget {
                target: Some(target),
                ..
            } => {
                sdo_write(node, &TARGET_POSITION, target as i64)?;
            },
            _ => {},
        }
        let control_word = frame.control_word();
        sdo_write(node, &CONTROL_WORD, control_word as i64)?;
        trace!("SDO command 0x{:04X} written", control_word);
        Ok(())
    }
}

/// 广播式 PDO 路径
#[derive(Debug, Clone)]
pub struct PdoTransport {
    image: RpdoImage,
    delays: SettleDelays,
}

impl PdoTransport {
    /// # 参数
    /// - `node_id`: 用于默认 COB-ID
    /// - `cob_ids`: 从设备读回的 RPDO1..3 COB-ID
    /// - `delays`: 步间等待
    pub fn new(node_id: u8, cob_ids: [PdoCobId; 3], delays: SettleDelays) -> Self {
        let mut image = RpdoImage::with_defaults(node_id);
        for (channel, cob_id) in RpdoChannel::ALL.into_iter().zip(cob_ids) {
            image.set_cob_id(channel, cob_id);
        }
        Self { image, delays }
    }

    pub fn image(&self) -> &RpdoImage {
        &self.image
    }
}

impl CommandTransport for PdoTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Pdo
    }

    fn write_command(
        &mut self,
        node: &dyn NodeClient,
        frame: CommandFrame,
        settle: Settle,
    ) -> Result<(), DriveError> {
        match frame {
            CommandFrame::ControlWithMode { mode, .. } => self.image.set_mode(mode),
            CommandFrame::ControlWithTarget {
                target: Some(target),
                ..
            } => self.image.set_target(target),
            _ => {},
        }
        self.image.set_control_word(frame.control_word());

        let channel = frame.channel();
        let can_frame = self
            .image
            .frame(channel)
            .map_err(|e| DriveError::Transport(e.into()))?;
        node.pdo_transmit(can_frame)?;
        trace!(
            "RPDO{} command 0x{:04X} transmitted",
            channel.number(),
            frame.control_word()
        );
        settle_for(self.delays.get(settle));
        Ok(())
    }
}

/// 按模式构造传输路径
pub fn transport_for(
    mode: TransportMode,
    node_id: u8,
    rpdo_cob_ids: [PdoCobId; 3],
    pdo_delays: SettleDelays,
) -> Box<dyn CommandTransport> {
    match mode {
        TransportMode::Sdo => Box::new(SdoTransport::new()),
        TransportMode::Pdo => Box::new(PdoTransport::new(node_id, rpdo_cob_ids, pdo_delays)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_mode_parse() {
        assert_eq!("PDO".parse::<TransportMode>().unwrap(), TransportMode::Pdo);
        assert_eq!(" sdo ".parse::<TransportMode>().unwrap(), TransportMode::Sdo);
        assert!("can".parse::<TransportMode>().is_err());
        assert_eq!(TransportMode::default().to_string(), "SDO");
    }

    #[test]
    fn test_command_frame_channels() {
        assert_eq!(
            CommandFrame::Control { control_word: 0x06 }.channel(),
            RpdoChannel::Control
        );
        let frame = CommandFrame::ControlWithMode {
            control_word: 0x1F,
            mode: 6,
        };
        assert_eq!(frame.channel(), RpdoChannel::ControlMode);
        assert_eq!(frame.control_word(), 0x1F);
        let frame = CommandFrame::ControlWithTarget {
            control_word: 0x0F,
            target: None,
        };
        assert_eq!(frame.channel(), RpdoChannel::ControlTarget);
    }

    #[test]
    fn test_pdo_image_keeps_latched_target() {
        let cob_ids = RpdoChannel::ALL.map(|c| c.default_cob_id(2));
        let mut transport = PdoTransport::new(2, cob_ids, SettleDelays::none());
        transport.image.set_target(50_000);
        transport.image.set_control_word(0x1F);
        let frame = transport.image().frame(RpdoChannel::ControlTarget).unwrap();
        assert_eq!(frame.id, 0x402);
        assert_eq!(frame.data_slice(), &[0x1F, 0x00, 0x50, 0xC3, 0x00, 0x00]);
    }
}
