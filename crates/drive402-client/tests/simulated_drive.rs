//! 端到端测试：会话层 + 节点客户端 + 模拟驱动器

use drive402_can::mock::{DeviceEvent, MockCanAdapter, MockDriveHandle, SimulatedDriveConfig, WriteSource};
use drive402_client::{Drive, DriveConfig, DriveError, SettleDelays, TransportMode};
use drive402_protocol::{DriveState, OperationMode};
use std::time::{Duration, Instant};

fn settle(ms: u64) -> SettleDelays {
    let d = Duration::from_millis(ms);
    SettleDelays {
        shutdown: d,
        switch_on: d,
        enable_operation: d,
        disable: d,
        homing_mode: d,
        homing_start: d,
        homing_restore: d,
        move_latch: d,
        move_clear: d,
    }
}

fn test_config(transport: TransportMode) -> DriveConfig {
    let mut config = DriveConfig::default();
    config.connection.interface = "sim".to_string();
    config.connection.transport = transport;
    config.connection.bootup_timeout = Duration::from_secs(1);
    config.connection.disconnect_settle = Duration::from_millis(10);
    config.pdo_delays = settle(20);
    config.poll.poll_interval = Duration::from_millis(20);
    config.homing.verify_timeout = Duration::from_millis(500);
    config
}

fn connect(transport: TransportMode) -> (Drive, MockDriveHandle) {
    let (adapter, handle) = MockCanAdapter::new(SimulatedDriveConfig::default());
    let drive = Drive::connect(adapter, test_config(transport)).unwrap();
    (drive, handle)
}

#[test]
fn test_connect_configures_pdo_channels_in_order() {
    let (drive, handle) = connect(TransportMode::Sdo);

    let snapshots: Vec<_> = handle
        .journal()
        .into_iter()
        .filter_map(|e| match e {
            DeviceEvent::PdoConfig(snapshot) => Some(snapshot),
            _ => None,
        })
        .collect();
    // 5 次置无效 + 2 次传输类型 + 5 次启用
    assert_eq!(snapshots.len(), 12);
    let final_config = snapshots[snapshots.len() - 1];
    assert!(final_config.enabled_tpdos_event_driven());
    assert_eq!(final_config.tpdo_transmission_types, [254, 254]);
    assert_eq!(final_config.rpdo_cob_ids, [0x202, 0x302, 0x402]);
    assert_eq!(final_config.tpdo_cob_ids, [0x182, 0x282]);

    assert_eq!(drive.pdo_map().tpdo.map(|c| c.can_id()), [0x182, 0x282]);
    assert!(!handle.journal().iter().any(|e| matches!(e, DeviceEvent::SdoAbort { .. })));
    drive.disconnect();
}

#[test]
fn test_enable_walks_state_machine() {
    let (mut drive, handle) = connect(TransportMode::Sdo);
    handle.clear_journal();

    let status = drive.enable().unwrap();
    assert_eq!(status & 0x6F, 0x27);

    let observed: Vec<u16> = handle
        .journal()
        .into_iter()
        .filter_map(|e| match e {
            DeviceEvent::ControlWord {
                source: WriteSource::Sdo,
                status_after,
                ..
            } => Some(status_after),
            _ => None,
        })
        .collect();
    assert_eq!(observed, vec![0x0021, 0x0023, 0x0027]);
    assert_eq!(drive.telemetry().state(), DriveState::OperationEnabled);
    drive.disconnect();
}

#[test]
fn test_motion_parameters_round_trip() {
    let (mut drive, _handle) = connect(TransportMode::Sdo);
    drive.set_velocity(100_000).unwrap();
    drive.set_acceleration(20_000).unwrap();
    drive.set_deceleration(30_000).unwrap();

    let params = drive.parameters().unwrap();
    assert_eq!(params.velocity, 100_000);
    assert_eq!(params.acceleration, 20_000);
    assert_eq!(params.deceleration, 30_000);
    drive.disconnect();
}

fn home_move_wait(transport: TransportMode) {
    let (mut drive, handle) = connect(transport);
    handle.with_device(|device| device.set_position(12_345));

    drive.enable().unwrap();
    let report = drive.home().unwrap();
    assert!(report.attained, "{} homing: {:04X}", transport, report.status_word);
    assert_eq!(report.status_word & 0x1400, 0x1400);
    assert_eq!(handle.position(), 0);

    drive.set_velocity(100_000).unwrap();
    drive.move_to(50_000).unwrap();
    let outcome = drive.wait(Duration::from_secs(10)).unwrap();
    assert!(outcome.is_reached(), "{} wait: {:?}", transport, outcome);
    let position = outcome.position().unwrap();
    assert!((position - 50_000).abs() <= 10, "{} position {}", transport, position);

    let status = drive.status().unwrap();
    assert_eq!(status.mode, OperationMode::ProfilePosition);
    assert_eq!(status.transport, transport);
    assert_eq!(status.state, DriveState::OperationEnabled);
    assert_eq!(status.position, 50_000);

    drive.disconnect();
    assert_eq!(
        handle.with_device(|device| device.drive_state()),
        DriveState::ReadyToSwitchOn
    );
}

#[test]
fn test_home_move_wait_over_sdo() {
    home_move_wait(TransportMode::Sdo);
}

#[test]
fn test_home_move_wait_over_pdo() {
    home_move_wait(TransportMode::Pdo);
}

#[test]
fn test_pdo_commands_arrive_on_rpdo_channels() {
    let (mut drive, handle) = connect(TransportMode::Pdo);
    drive.enable().unwrap();
    handle.clear_journal();

    drive.move_to(1_000).unwrap();
    let sources: Vec<WriteSource> = handle
        .journal()
        .into_iter()
        .filter_map(|e| match e {
            DeviceEvent::ControlWord { source, .. } => Some(source),
            _ => None,
        })
        .collect();
    assert_eq!(sources, vec![WriteSource::Pdo(3); 3]);
    drive.disconnect();
}

#[test]
fn test_wait_times_out_without_motion() {
    let (mut drive, handle) = connect(TransportMode::Sdo);
    drive.enable().unwrap();
    drive.set_velocity(1_000).unwrap();
    drive.move_to(1_000_000).unwrap();

    let start = Instant::now();
    let outcome = drive.wait(Duration::from_millis(300)).unwrap();
    let elapsed = start.elapsed();
    assert!(!outcome.is_reached());
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(300) + Duration::from_millis(200));
    assert!(handle.position() < 1_000_000);
    drive.disconnect();
}

#[test]
fn test_unresponsive_device_times_out_on_bootup() {
    let (adapter, _handle) = MockCanAdapter::new(SimulatedDriveConfig {
        responsive: false,
        ..Default::default()
    });
    let mut config = test_config(TransportMode::Sdo);
    config.connection.bootup_timeout = Duration::from_millis(200);

    let start = Instant::now();
    match Drive::connect(adapter, config) {
        Err(DriveError::BootTimeout { timeout }) => {
            assert_eq!(timeout, Duration::from_millis(200));
            assert!(start.elapsed() >= Duration::from_millis(200));
        },
        other => panic!("Expected BootTimeout, got {:?}", other),
    }
}

#[test]
fn test_fault_prevents_enable() {
    let (mut drive, handle) = connect(TransportMode::Sdo);
    handle.with_device(|device| device.inject_fault());
    match drive.enable() {
        Err(DriveError::UnexpectedState { observed, .. }) => {
            assert_eq!(observed, DriveState::Fault)
        },
        other => panic!("Expected UnexpectedState, got {:?}", other),
    }
    drive.disconnect();
}
