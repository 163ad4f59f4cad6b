//! 命令序列测试（记录型节点客户端，无总线）

use drive402_client::{
    Drive, DriveConfig, DriveError, Precondition, SettleDelays, TransportMode,
};
use drive402_driver::{DriverError, NodeClient, PdoCallback};
use drive402_protocol::{
    CONTROL_WORD, CanopenFrame, HOMING_METHOD, MODES_OF_OPERATION, NmtCommand, OdEntry,
    RpdoChannel, STATUS_WORD, SdoAbortCode, TARGET_POSITION, TpdoChannel,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Access {
    Write { index: u16, value: i64 },
    Pdo(CanopenFrame),
    Nmt(NmtCommand, u8),
    ClearListeners,
}

#[derive(Default)]
struct Shared {
    od: HashMap<(u16, u8), i64>,
    log: Vec<Access>,
    status_word: u16,
    reject: Option<(u16, SdoAbortCode)>,
    pdo_down: bool,
}

/// 记录所有写入的节点客户端；状态字由测试设定
#[derive(Clone)]
struct RecordingNode {
    shared: Arc<Mutex<Shared>>,
}

impl RecordingNode {
    fn new() -> Self {
        let mut shared = Shared {
            status_word: 0x0027,
            ..Default::default()
        };
        for channel in RpdoChannel::ALL {
            let entry = OdEntry::rpdo_cob_id(channel.number());
            shared
                .od
                .insert((entry.index, entry.sub_index), channel.default_cob_id(2).0 as i64);
        }
        for channel in TpdoChannel::ALL {
            let entry = OdEntry::tpdo_cob_id(channel.number());
            shared
                .od
                .insert((entry.index, entry.sub_index), channel.default_cob_id(2).0 as i64);
        }
        Self {
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    fn set_status(&self, status_word: u16) {
        self.shared.lock().status_word = status_word;
    }

    fn reject(&self, index: u16, code: SdoAbortCode) {
        self.shared.lock().reject = Some((index, code));
    }

    fn fail_pdo(&self) {
        self.shared.lock().pdo_down = true;
    }

    fn clear_log(&self) {
        self.shared.lock().log.clear();
    }

    fn log(&self) -> Vec<Access> {
        self.shared.lock().log.clone()
    }

    /// 按时间顺序提取所有控制字（SDO 写入与 RPDO 首两字节）
    fn control_words(&self) -> Vec<u16> {
        self.log()
            .into_iter()
            .filter_map(|access| match access {
                Access::Write { index, value } if index == CONTROL_WORD.index => {
                    Some(value as u16)
                },
                Access::Pdo(frame) => {
                    Some(u16::from_le_bytes([frame.data[0], frame.data[1]]))
                },
                _ => None,
            })
            .collect()
    }
}

impl NodeClient for RecordingNode {
    fn node_id(&self) -> u8 {
        2
    }

    fn sdo_read(&self, entry: &OdEntry) -> Result<i64, DriverError> {
        let shared = self.shared.lock();
        if entry.index == STATUS_WORD.index {
            return Ok(shared.status_word as i64);
        }
        Ok(shared
            .od
            .get(&(entry.index, entry.sub_index))
            .copied()
            .unwrap_or(0))
    }

    fn sdo_write(&self, entry: &OdEntry, value: i64) -> Result<(), DriverError> {
        let mut shared = self.shared.lock();
        if let Some((index, code)) = shared.reject
            && index == entry.index
        {
            return Err(DriverError::SdoAbort {
                index: entry.index,
                sub_index: entry.sub_index,
                code,
            });
        }
        shared.od.insert((entry.index, entry.sub_index), value);
        shared.log.push(Access::Write {
            index: entry.index,
            value,
        });
        Ok(())
    }

    fn nmt_command(&self, command: NmtCommand, node_id: u8) -> Result<(), DriverError> {
        self.shared.lock().log.push(Access::Nmt(command, node_id));
        Ok(())
    }

    fn wait_for_bootup(&self, _timeout: Duration) -> Result<(), DriverError> {
        Ok(())
    }

    fn pdo_transmit(&self, frame: CanopenFrame) -> Result<(), DriverError> {
        let mut shared = self.shared.lock();
        if shared.pdo_down {
            return Err(DriverError::ChannelClosed);
        }
        shared.log.push(Access::Pdo(frame));
        Ok(())
    }

    fn add_pdo_listener(&self, _cob_id: u32, _callback: PdoCallback) {}

    fn clear_pdo_listeners(&self) {
        self.shared.lock().log.push(Access::ClearListeners);
    }
}

fn quick_config(transport: TransportMode) -> DriveConfig {
    let mut config = DriveConfig::default();
    config.connection.transport = transport;
    config.connection.disconnect_settle = Duration::ZERO;
    config.pdo_delays = SettleDelays::none();
    config.poll.poll_interval = Duration::from_millis(5);
    config.homing.verify_timeout = Duration::from_millis(100);
    config
}

fn connected(transport: TransportMode) -> (Drive, RecordingNode) {
    let node = RecordingNode::new();
    let drive = Drive::connect_node(Box::new(node.clone()), quick_config(transport)).unwrap();
    node.clear_log();
    (drive, node)
}

#[test]
fn test_connect_resets_then_starts_node() {
    let node = RecordingNode::new();
    let _drive = Drive::connect_node(Box::new(node.clone()), quick_config(TransportMode::Sdo))
        .unwrap();
    let nmt: Vec<_> = node
        .log()
        .into_iter()
        .filter(|a| matches!(a, Access::Nmt(..)))
        .collect();
    assert_eq!(
        nmt,
        vec![
            Access::Nmt(NmtCommand::ResetNode, 0),
            Access::Nmt(NmtCommand::StartRemoteNode, 2),
        ]
    );
}

#[test]
fn test_motion_requires_enable_and_writes_nothing() {
    let (mut drive, node) = connected(TransportMode::Sdo);

    let err = drive.move_to(50_000).unwrap_err();
    assert!(matches!(err, DriveError::Precondition(Precondition::NotEnabled)));
    let err = drive.home().unwrap_err();
    assert!(matches!(err, DriveError::Precondition(Precondition::NotEnabled)));
    assert!(drive.wait(Duration::from_millis(10)).is_err());

    assert!(node.log().is_empty());
}

#[test]
fn test_enable_sequence_and_double_enable() {
    let (mut drive, node) = connected(TransportMode::Sdo);

    assert_eq!(drive.enable().unwrap(), 0x0027);
    assert_eq!(node.control_words(), vec![0x06, 0x07, 0x0F]);
    assert!(drive.is_enabled());

    node.clear_log();
    let err = drive.enable().unwrap_err();
    assert!(matches!(err, DriveError::Precondition(Precondition::AlreadyEnabled)));
    assert!(node.log().is_empty());
}

#[test]
fn test_enable_reports_unexpected_state() {
    let (mut drive, node) = connected(TransportMode::Sdo);
    node.set_status(0x0021);
    match drive.enable() {
        Err(DriveError::UnexpectedState { status_word, .. }) => assert_eq!(status_word, 0x0021),
        other => panic!("Expected UnexpectedState, got {:?}", other),
    }
    assert!(!drive.is_enabled());
}

#[test]
fn test_sdo_move_writes_target_before_control_word() {
    let (mut drive, node) = connected(TransportMode::Sdo);
    drive.enable().unwrap();
    node.clear_log();

    drive.move_to(50_000).unwrap();
    let log = node.log();
    assert_eq!(
        log,
        vec![
            Access::Write {
                index: TARGET_POSITION.index,
                value: 50_000
            },
            Access::Write {
                index: CONTROL_WORD.index,
                value: 0x0F
            },
            Access::Write {
                index: CONTROL_WORD.index,
                value: 0x0F
            },
            Access::Write {
                index: CONTROL_WORD.index,
                value: 0x1F
            },
        ]
    );
}

#[test]
fn test_repeated_moves_always_produce_rising_edge() {
    for transport in [TransportMode::Sdo, TransportMode::Pdo] {
        let (mut drive, node) = connected(transport);
        drive.enable().unwrap();
        drive.move_to(50_000).unwrap();
        drive.move_to(50_000).unwrap();

        let words = node.control_words();
        let highs = words.iter().filter(|w| **w & 0x10 != 0).count();
        assert_eq!(highs, 2, "{} transport", transport);
        for pair in words.windows(2) {
            assert!(
                !(pair[0] & 0x10 != 0 && pair[1] & 0x10 != 0),
                "consecutive bit4-high writes over {}: {:04X?}",
                transport,
                words
            );
        }
    }
}

#[test]
fn test_pdo_move_uses_rpdo3_only() {
    let (mut drive, node) = connected(TransportMode::Pdo);
    drive.enable().unwrap();
    node.clear_log();

    drive.move_to(-1000).unwrap();
    let frames: Vec<_> = node
        .log()
        .into_iter()
        .map(|access| match access {
            Access::Pdo(frame) => frame,
            other => panic!("Unexpected access {:?}", other),
        })
        .collect();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.id == 0x402 && f.len == 6));
    // 后两帧沿用锁存的目标
    for frame in &frames {
        assert_eq!(i32::from_le_bytes(frame.data[2..6].try_into().unwrap()), -1000);
    }
}

#[test]
fn test_home_restores_profile_position_even_when_not_attained() {
    let (mut drive, node) = connected(TransportMode::Sdo);
    drive.enable().unwrap();
    node.clear_log();

    let report = drive.home().unwrap();
    assert!(!report.attained);
    assert_eq!(report.status_word, 0x0027);

    let log = node.log();
    assert_eq!(
        log.first(),
        Some(&Access::Write {
            index: HOMING_METHOD.index,
            value: 35
        })
    );
    let modes: Vec<i64> = log
        .iter()
        .filter_map(|a| match a {
            Access::Write { index, value } if *index == MODES_OF_OPERATION.index => Some(*value),
            _ => None,
        })
        .collect();
    assert_eq!(modes, vec![6, 6, 1]);
    assert_eq!(node.control_words(), vec![0x0F, 0x1F, 0x0F]);
}

#[test]
fn test_home_attained_when_bits_set() {
    let (mut drive, node) = connected(TransportMode::Sdo);
    drive.enable().unwrap();
    node.set_status(0x1427);
    let report = drive.home().unwrap();
    assert!(report.attained);
    assert_eq!(report.status_word, 0x1427);
}

#[test]
fn test_rejected_write_keeps_abort_code() {
    let (mut drive, node) = connected(TransportMode::Sdo);
    node.reject(0x6081, SdoAbortCode::VALUE_TOO_HIGH);
    match drive.set_velocity(-1) {
        Err(DriveError::DeviceRejected {
            index,
            value,
            code,
            ..
        }) => {
            assert_eq!(index, 0x6081);
            assert_eq!(value, Some(-1));
            assert_eq!(code, SdoAbortCode::VALUE_TOO_HIGH);
        },
        other => panic!("Expected DeviceRejected, got {:?}", other),
    }
}

#[test]
fn test_transport_switch_applies_to_next_command() {
    let (mut drive, node) = connected(TransportMode::Sdo);
    drive.enable().unwrap();
    drive.set_transport(TransportMode::Pdo);
    assert_eq!(drive.transport_mode(), TransportMode::Pdo);
    node.clear_log();

    drive.disable().unwrap();
    assert!(matches!(node.log().as_slice(), [Access::Pdo(frame)] if frame.id == 0x202));
    assert!(!drive.is_enabled());
}

#[test]
fn test_disconnect_proceeds_when_disable_fails() {
    for transport in [TransportMode::Sdo, TransportMode::Pdo] {
        let (mut drive, node) = connected(transport);
        drive.enable().unwrap();
        assert!(drive.is_enabled());
        match transport {
            TransportMode::Sdo => node.reject(CONTROL_WORD.index, SdoAbortCode::INVALID_DEVICE_STATE),
            TransportMode::Pdo => node.fail_pdo(),
        }
        node.clear_log();

        drive.disconnect();
        assert_eq!(
            node.log(),
            vec![
                Access::Nmt(NmtCommand::EnterPreOperational, 0),
                Access::ClearListeners,
            ],
            "{} transport",
            transport
        );
    }
}
