//! 模拟 CiA 402 驱动器
//!
//! 纯状态机，不持有线程：由 [`super::MockCanAdapter`] 在收到帧或轮询时驱动。
//! 行为覆盖本系统使用的对象字典子集：
//!
//! - PDS 状态机（控制字 → 状态字）
//! - 轮廓位置模式：bit4 上升沿锁存目标并按 profile velocity 线性运动
//! - 回零模式：bit4 上升沿将当前位置清零，置位 bit10 / bit12
//! - 加速 SDO 读写与中止码（设备状态不允许、取值越界、只读等）
//! - PDO 通信参数（COB-ID bit31、传输类型），事件驱动 TPDO
//! - NMT 复位 / 启动 / 预运行
//!
//! 每次控制字写入与 PDO 参数修改都会记录到事件日志，供测试检查中间状态。

use drive402_protocol::{
    ACTUAL_POSITION, CONTROL_WORD, CanopenFrame, ControlWord, DataType, DriveState, HOMING_METHOD,
    MODES_OF_OPERATION, NmtCommand, NmtState, OperationMode, PROFILE_ACCELERATION,
    PROFILE_DECELERATION, PROFILE_VELOCITY, PdoCobId, RpdoChannel, RpdoPayload, STATUS_WORD,
    SdoAbortCode, SdoRequest, SdoResponse, TARGET_POSITION, TRANSMISSION_TYPE_DEVICE_PROFILE,
    TRANSMISSION_TYPE_EVENT_DRIVEN, TpdoChannel, TpdoSample, sdo_request_cob_id,
};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const TARGET_REACHED: u16 = 1 << 10;
const BIT12: u16 = 1 << 12;

/// 控制字写入来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSource {
    Sdo,
    Pdo(u8),
}

/// PDO 通信参数快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoConfigSnapshot {
    pub rpdo_cob_ids: [u32; 3],
    pub tpdo_cob_ids: [u32; 2],
    pub tpdo_transmission_types: [u8; 2],
}

impl PdoConfigSnapshot {
    /// 所有已启用的 TPDO 都使用事件驱动传输类型
    pub fn enabled_tpdos_event_driven(&self) -> bool {
        self.tpdo_cob_ids
            .iter()
            .zip(self.tpdo_transmission_types.iter())
            .filter(|(cob, _)| !PdoCobId(**cob).is_disabled())
            .all(|(_, ty)| *ty == TRANSMISSION_TYPE_EVENT_DRIVEN)
    }
}

/// 设备事件日志
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// 控制字被接受，附带写入后的状态字
    ControlWord {
        value: u16,
        source: WriteSource,
        status_after: u16,
    },
    /// 控制字被拒绝（非法状态转换）
    ControlWordRejected { value: u16, source: WriteSource },
    /// 运行模式写入
    Mode { value: i8, source: WriteSource },
    /// 目标位置写入
    Target { value: i32, source: WriteSource },
    /// PDO 通信参数修改后的快照
    PdoConfig(PdoConfigSnapshot),
    /// SDO 中止
    SdoAbort {
        index: u16,
        sub_index: u8,
        code: SdoAbortCode,
    },
    Nmt(NmtCommand),
    HomingCompleted,
    MotionStarted { from: i32, to: i32 },
    MotionFinished { position: i32 },
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: i32,
    to: i32,
    started: Instant,
    duration: Duration,
}

/// 模拟驱动器配置
#[derive(Debug, Clone)]
pub struct SimulatedDriveConfig {
    pub node_id: u8,
    /// 是否响应 NMT 复位（发送 bootup）
    pub responsive: bool,
    pub profile_velocity: i32,
    pub profile_acceleration: u32,
    pub profile_deceleration: u32,
}

impl Default for SimulatedDriveConfig {
    fn default() -> Self {
        Self {
            node_id: 2,
            responsive: true,
            profile_velocity: 100_000,
            profile_acceleration: 50_000,
            profile_deceleration: 50_000,
        }
    }
}

/// 模拟驱动器
#[derive(Debug)]
pub struct SimulatedDrive {
    config: SimulatedDriveConfig,
    nmt: NmtState,
    state: DriveState,
    control_word: u16,
    flags: u16,
    mode: i8,
    position: i32,
    target: i32,
    velocity: i32,
    acceleration: u32,
    deceleration: u32,
    homing_method: i8,
    motion: Option<Motion>,
    rpdo_cob_ids: [u32; 3],
    tpdo_cob_ids: [u32; 2],
    tpdo_types: [u8; 2],
    last_emitted: Option<(u16, i32)>,
    journal: Vec<DeviceEvent>,
}

impl SimulatedDrive {
    pub fn new(config: SimulatedDriveConfig) -> Self {
        let node_id = config.node_id;
        Self {
            nmt: NmtState::PreOperational,
            state: DriveState::SwitchOnDisabled,
            control_word: 0,
            flags: 0,
            mode: OperationMode::ProfilePosition.raw(),
            position: 0,
            target: 0,
            velocity: config.profile_velocity,
            acceleration: config.profile_acceleration,
            deceleration: config.profile_deceleration,
            homing_method: 0,
            motion: None,
            rpdo_cob_ids: RpdoChannel::ALL.map(|c| c.default_cob_id(node_id).0),
            tpdo_cob_ids: TpdoChannel::ALL.map(|c| c.default_cob_id(node_id).0),
            tpdo_types: [TRANSMISSION_TYPE_DEVICE_PROFILE; 2],
            last_emitted: None,
            journal: Vec::new(),
            config,
        }
    }

    pub fn node_id(&self) -> u8 {
        self.config.node_id
    }

    pub fn nmt_state(&self) -> NmtState {
        self.nmt
    }

    pub fn drive_state(&self) -> DriveState {
        self.state
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    /// 放置到指定位置（测试用）
    pub fn set_position(&mut self, position: i32) {
        self.position = position;
    }

    pub fn set_responsive(&mut self, responsive: bool) {
        self.config.responsive = responsive;
    }

    /// 强制进入故障状态（测试用）
    pub fn inject_fault(&mut self) {
        self.state = DriveState::Fault;
        self.motion = None;
    }

    pub fn journal(&self) -> &[DeviceEvent] {
        &self.journal
    }

    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    pub fn pdo_config(&self) -> PdoConfigSnapshot {
        PdoConfigSnapshot {
            rpdo_cob_ids: self.rpdo_cob_ids,
            tpdo_cob_ids: self.tpdo_cob_ids,
            tpdo_transmission_types: self.tpdo_types,
        }
    }

    /// 当前状态字
    pub fn status_word(&self) -> u16 {
        let base = match self.state {
            DriveState::NotReadyToSwitchOn => 0x0000,
            DriveState::SwitchOnDisabled => 0x0040,
            DriveState::ReadyToSwitchOn => 0x0021,
            DriveState::SwitchedOn => 0x0023,
            DriveState::OperationEnabled => 0x0027,
            DriveState::QuickStopActive => 0x0007,
            DriveState::FaultReactionActive => 0x000F,
            DriveState::Fault | DriveState::Unknown => 0x0008,
        };
        base | self.flags
    }

    /// 处理主站发来的帧，返回设备应答帧
    pub fn handle_frame(&mut self, frame: &CanopenFrame, now: Instant) -> Vec<CanopenFrame> {
        self.advance(now);
        let mut out = Vec::new();

        if frame.id == 0x000 {
            if let Ok((command, target)) = NmtCommand::parse(frame)
                && (target == 0 || target == self.config.node_id)
            {
                self.apply_nmt(command, &mut out);
            }
        } else if frame.id == sdo_request_cob_id(self.config.node_id) as u32 {
            if self.nmt != NmtState::Stopped
                && let Some(response) = self.handle_sdo(frame, now)
            {
                out.push(response.to_frame(self.config.node_id));
            }
        } else if let Some(channel) = self.rpdo_channel_for(frame.id) {
            if self.nmt == NmtState::Operational {
                self.handle_rpdo(channel, frame, now);
            } else {
                trace!("RPDO{} ignored in NMT state {:?}", channel.number(), self.nmt);
            }
        }

        self.emit_telemetry(&mut out);
        out
    }

    /// 推进运动并产生事件驱动的 TPDO
    pub fn poll(&mut self, now: Instant) -> Vec<CanopenFrame> {
        self.advance(now);
        let mut out = Vec::new();
        self.emit_telemetry(&mut out);
        out
    }

    fn apply_nmt(&mut self, command: NmtCommand, out: &mut Vec<CanopenFrame>) {
        self.journal.push(DeviceEvent::Nmt(command));
        match command {
            NmtCommand::ResetNode | NmtCommand::ResetCommunication => {
                if !self.config.responsive {
                    debug!("Simulated node {} ignores reset", self.config.node_id);
                    return;
                }
                if command == NmtCommand::ResetNode {
                    self.reset_application();
                }
                self.reset_communication();
                self.nmt = NmtState::PreOperational;
                out.push(NmtState::BootUp.to_frame(self.config.node_id));
            },
            NmtCommand::StartRemoteNode => {
                self.nmt = NmtState::Operational;
                self.last_emitted = None;
            },
            NmtCommand::StopRemoteNode => self.nmt = NmtState::Stopped,
            NmtCommand::EnterPreOperational => self.nmt = NmtState::PreOperational,
        }
    }

    fn reset_application(&mut self) {
        self.state = DriveState::SwitchOnDisabled;
        self.control_word = 0;
        self.flags = 0;
        self.mode = OperationMode::ProfilePosition.raw();
        self.motion = None;
    }

    fn reset_communication(&mut self) {
        let node_id = self.config.node_id;
        self.rpdo_cob_ids = RpdoChannel::ALL.map(|c| c.default_cob_id(node_id).0);
        self.tpdo_cob_ids = TpdoChannel::ALL.map(|c| c.default_cob_id(node_id).0);
        self.tpdo_types = [TRANSMISSION_TYPE_DEVICE_PROFILE; 2];
        self.last_emitted = None;
    }

    fn rpdo_channel_for(&self, id: u32) -> Option<RpdoChannel> {
        RpdoChannel::ALL.into_iter().find(|channel| {
            let cob = PdoCobId(self.rpdo_cob_ids[channel.number() as usize - 1]);
            !cob.is_disabled() && cob.can_id() as u32 == id
        })
    }

    fn handle_rpdo(&mut self, channel: RpdoChannel, frame: &CanopenFrame, now: Instant) {
        let payload = match RpdoPayload::decode(channel, frame.data_slice()) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Malformed RPDO{}: {}", channel.number(), e);
                return;
            },
        };
        let source = WriteSource::Pdo(channel.number());

        if let Some(mode) = payload.mode
            && self.write_mode(mode, source).is_err()
        {
            return;
        }
        // PDO 没有应答通道，非法写入直接丢弃
        if let Some(target) = payload.target
            && self.write_target(target, source).is_err()
        {
            return;
        }
        let _ = self.write_control_word(payload.control_word, source, now);
    }

    fn handle_sdo(&mut self, frame: &CanopenFrame, now: Instant) -> Option<SdoResponse> {
        let request = match SdoRequest::parse(frame) {
            Ok(request) => request,
            Err(e) => {
                debug!("Unsupported SDO request: {}", e);
                let index = u16::from_le_bytes([frame.data[1], frame.data[2]]);
                return Some(SdoResponse::Abort {
                    index,
                    sub_index: frame.data[3],
                    code: SdoAbortCode::INVALID_COMMAND,
                });
            },
        };

        let result = match request {
            SdoRequest::Upload { index, sub_index } => {
                self.read_object(index, sub_index).and_then(|(value, data_type)| {
                    let (data, len) = data_type
                        .encode(value)
                        .map_err(|_| SdoAbortCode::GENERAL_ERROR)?;
                    Ok(SdoResponse::Upload {
                        index,
                        sub_index,
                        data,
                        len,
                    })
                })
            },
            SdoRequest::Download {
                index,
                sub_index,
                data,
                len,
            } => self
                .write_object(index, sub_index, &data[..len as usize], now)
                .map(|_| SdoResponse::DownloadAck { index, sub_index }),
            // 主站中止：无需应答
            SdoRequest::Abort { .. } => return None,
        };

        let (index, sub_index) = match request {
            SdoRequest::Upload { index, sub_index }
            | SdoRequest::Download {
                index, sub_index, ..
            }
            | SdoRequest::Abort {
                index, sub_index, ..
            } => (index, sub_index),
        };

        Some(result.unwrap_or_else(|code| {
            self.journal.push(DeviceEvent::SdoAbort {
                index,
                sub_index,
                code,
            });
            SdoResponse::Abort {
                index,
                sub_index,
                code,
            }
        }))
    }

    fn read_object(&self, index: u16, sub_index: u8) -> Result<(i64, DataType), SdoAbortCode> {
        let entry = |value: i64, data_type: DataType, expected_sub: u8| {
            if sub_index == expected_sub {
                Ok((value, data_type))
            } else {
                Err(SdoAbortCode::SUB_INDEX_NOT_FOUND)
            }
        };

        match index {
            i if i == CONTROL_WORD.index => entry(self.control_word as i64, CONTROL_WORD.data_type, 0),
            i if i == STATUS_WORD.index => entry(self.status_word() as i64, STATUS_WORD.data_type, 0),
            i if i == MODES_OF_OPERATION.index => {
                entry(self.mode as i64, MODES_OF_OPERATION.data_type, 0)
            },
            i if i == ACTUAL_POSITION.index => {
                entry(self.position as i64, ACTUAL_POSITION.data_type, 0)
            },
            i if i == TARGET_POSITION.index => {
                entry(self.target as i64, TARGET_POSITION.data_type, 0)
            },
            i if i == PROFILE_VELOCITY.index => {
                entry(self.velocity as i64, PROFILE_VELOCITY.data_type, 0)
            },
            i if i == PROFILE_ACCELERATION.index => {
                entry(self.acceleration as i64, PROFILE_ACCELERATION.data_type, 0)
            },
            i if i == PROFILE_DECELERATION.index => {
                entry(self.deceleration as i64, PROFILE_DECELERATION.data_type, 0)
            },
            i if i == HOMING_METHOD.index => {
                entry(self.homing_method as i64, HOMING_METHOD.data_type, 0)
            },
            0x1400..=0x1402 => {
                let n = (index - 0x1400) as usize;
                entry(self.rpdo_cob_ids[n] as i64, DataType::Unsigned32, 1)
            },
            0x1800..=0x1801 => {
                let n = (index - 0x1800) as usize;
                match sub_index {
                    1 => Ok((self.tpdo_cob_ids[n] as i64, DataType::Unsigned32)),
                    2 => Ok((self.tpdo_types[n] as i64, DataType::Unsigned8)),
                    _ => Err(SdoAbortCode::SUB_INDEX_NOT_FOUND),
                }
            },
            _ => Err(SdoAbortCode::OBJECT_NOT_FOUND),
        }
    }

    fn write_object(
        &mut self,
        index: u16,
        sub_index: u8,
        data: &[u8],
        now: Instant,
    ) -> Result<(), SdoAbortCode> {
        // 先做存在性检查，得到数据类型
        let (_, data_type) = self.read_object(index, sub_index)?;
        if data.len() != data_type.size() {
            return Err(SdoAbortCode::LENGTH_MISMATCH);
        }
        let value = data_type
            .decode(data)
            .map_err(|_| SdoAbortCode::LENGTH_MISMATCH)?;

        match index {
            i if i == STATUS_WORD.index || i == ACTUAL_POSITION.index => {
                Err(SdoAbortCode::READ_ONLY)
            },
            i if i == CONTROL_WORD.index => {
                self.write_control_word(value as u16, WriteSource::Sdo, now)
            },
            i if i == MODES_OF_OPERATION.index => self.write_mode(value as i8, WriteSource::Sdo),
            i if i == TARGET_POSITION.index => self.write_target(value as i32, WriteSource::Sdo),
            i if i == PROFILE_VELOCITY.index => {
                if value < 0 {
                    return Err(SdoAbortCode::VALUE_RANGE_EXCEEDED);
                }
                self.velocity = value as i32;
                Ok(())
            },
            i if i == PROFILE_ACCELERATION.index => {
                self.acceleration = value as u32;
                Ok(())
            },
            i if i == PROFILE_DECELERATION.index => {
                self.deceleration = value as u32;
                Ok(())
            },
            i if i == HOMING_METHOD.index => {
                self.homing_method = value as i8;
                Ok(())
            },
            0x1400..=0x1402 => {
                let n = (index - 0x1400) as usize;
                let updated = Self::write_cob_id(self.rpdo_cob_ids[n], value as u32)?;
                self.rpdo_cob_ids[n] = updated;
                self.journal.push(DeviceEvent::PdoConfig(self.pdo_config()));
                Ok(())
            },
            0x1800..=0x1801 => {
                let n = (index - 0x1800) as usize;
                if sub_index == 1 {
                    self.tpdo_cob_ids[n] = Self::write_cob_id(self.tpdo_cob_ids[n], value as u32)?;
                } else {
                    // 传输类型只能在 PDO 无效时修改
                    if !PdoCobId(self.tpdo_cob_ids[n]).is_disabled() {
                        return Err(SdoAbortCode::INVALID_DEVICE_STATE);
                    }
                    self.tpdo_types[n] = value as u8;
                }
                self.journal.push(DeviceEvent::PdoConfig(self.pdo_config()));
                self.last_emitted = None;
                Ok(())
            },
            _ => Err(SdoAbortCode::OBJECT_NOT_FOUND),
        }
    }

    /// COB-ID 规则：PDO 有效时不允许修改 CAN ID
    fn write_cob_id(current: u32, requested: u32) -> Result<u32, SdoAbortCode> {
        let current = PdoCobId(current);
        let requested = PdoCobId(requested);
        if !current.is_disabled()
            && !requested.is_disabled()
            && current.can_id() != requested.can_id()
        {
            return Err(SdoAbortCode::VALUE_RANGE_EXCEEDED);
        }
        Ok(requested.0)
    }

    fn write_mode(&mut self, value: i8, source: WriteSource) -> Result<(), SdoAbortCode> {
        match OperationMode::from(value) {
            OperationMode::ProfilePosition | OperationMode::ProfileVelocity | OperationMode::Homing => {},
            _ => return Err(SdoAbortCode::VALUE_RANGE_EXCEEDED),
        }
        if value != self.mode {
            self.flags &= !BIT12;
        }
        self.mode = value;
        self.journal.push(DeviceEvent::Mode { value, source });
        Ok(())
    }

    fn write_target(&mut self, value: i32, source: WriteSource) -> Result<(), SdoAbortCode> {
        if self.state != DriveState::OperationEnabled {
            return Err(SdoAbortCode::INVALID_DEVICE_STATE);
        }
        self.target = value;
        self.journal.push(DeviceEvent::Target { value, source });
        Ok(())
    }

    fn write_control_word(
        &mut self,
        value: u16,
        source: WriteSource,
        now: Instant,
    ) -> Result<(), SdoAbortCode> {
        let previous = self.control_word;
        let next = match self.next_state(previous, value) {
            Some(next) => next,
            None => {
                self.journal.push(DeviceEvent::ControlWordRejected { value, source });
                return Err(SdoAbortCode::INVALID_DEVICE_STATE);
            },
        };

        let was_enabled = self.state == DriveState::OperationEnabled;
        self.state = next;
        self.control_word = value;

        if next != DriveState::OperationEnabled {
            if was_enabled && let Some(motion) = self.motion.take() {
                debug!("Motion to {} aborted by state change", motion.to);
            }
        } else {
            let before = ControlWord::from_raw(previous).new_setpoint();
            let after = ControlWord::from_raw(value).new_setpoint();
            let rising = !before && after;
            let falling = before && !after;
            if rising {
                self.on_setpoint_edge(now);
            } else if falling && OperationMode::from(self.mode) == OperationMode::ProfilePosition {
                // set-point acknowledge 随 bit4 清除
                self.flags &= !BIT12;
            }
        }

        self.journal.push(DeviceEvent::ControlWord {
            value,
            source,
            status_after: self.status_word(),
        });
        Ok(())
    }

    /// CiA 402 状态转换表；`None` 表示当前状态不接受该命令
    fn next_state(&self, previous: u16, value: u16) -> Option<DriveState> {
        use DriveState::*;

        if self.state == Fault {
            let fault_reset = !ControlWord::from_raw(previous).fault_reset()
                && ControlWord::from_raw(value).fault_reset();
            return Some(if fault_reset { SwitchOnDisabled } else { Fault });
        }

        // 命令编码（CiA 402 表 "Device control commands"）
        let disable_voltage = value & 0x0002 == 0;
        let quick_stop = value & 0x0006 == 0x0002;
        let shutdown = value & 0x0087 == 0x0006;
        let switch_on = value & 0x008F == 0x0007;
        let enable_operation = value & 0x008F == 0x000F;

        if disable_voltage {
            return Some(SwitchOnDisabled);
        }
        if quick_stop {
            return Some(match self.state {
                OperationEnabled | QuickStopActive => QuickStopActive,
                _ => SwitchOnDisabled,
            });
        }
        if shutdown {
            return match self.state {
                SwitchOnDisabled | ReadyToSwitchOn | SwitchedOn | OperationEnabled => {
                    Some(ReadyToSwitchOn)
                },
                _ => None,
            };
        }
        if switch_on {
            return match self.state {
                ReadyToSwitchOn | SwitchedOn | OperationEnabled => Some(SwitchedOn),
                _ => None,
            };
        }
        if enable_operation {
            return match self.state {
                SwitchedOn | OperationEnabled | QuickStopActive => Some(OperationEnabled),
                _ => None,
            };
        }
        None
    }

    fn on_setpoint_edge(&mut self, now: Instant) {
        match OperationMode::from(self.mode) {
            OperationMode::Homing => {
                // 所有回零方法都简化为"以当前位置为零点"
                self.motion = None;
                self.position = 0;
                self.target = 0;
                self.flags |= TARGET_REACHED | BIT12;
                self.journal.push(DeviceEvent::HomingCompleted);
            },
            OperationMode::ProfilePosition => {
                let distance = (self.target as i64 - self.position as i64).unsigned_abs();
                let speed = self.velocity.max(1) as f64;
                let duration = Duration::from_secs_f64(distance as f64 / speed);
                self.flags = (self.flags & !TARGET_REACHED) | BIT12;
                self.journal.push(DeviceEvent::MotionStarted {
                    from: self.position,
                    to: self.target,
                });
                self.motion = Some(Motion {
                    from: self.position,
                    to: self.target,
                    started: now,
                    duration,
                });
                self.advance(now);
            },
            _ => {},
        }
    }

    fn advance(&mut self, now: Instant) {
        let Some(motion) = self.motion else {
            return;
        };
        let elapsed = now.saturating_duration_since(motion.started);
        if elapsed >= motion.duration {
            self.position = motion.to;
            self.motion = None;
            self.flags |= TARGET_REACHED;
            self.journal.push(DeviceEvent::MotionFinished {
                position: self.position,
            });
        } else {
            let fraction = elapsed.as_secs_f64() / motion.duration.as_secs_f64();
            let delta = (motion.to as f64 - motion.from as f64) * fraction;
            self.position = motion.from + delta as i32;
        }
    }

    fn emit_telemetry(&mut self, out: &mut Vec<CanopenFrame>) {
        if self.nmt != NmtState::Operational {
            return;
        }
        let current = (self.status_word(), self.position);
        if self.last_emitted == Some(current) {
            return;
        }

        let mut emitted = false;
        for channel in TpdoChannel::ALL {
            let n = channel.number() as usize - 1;
            let cob = PdoCobId(self.tpdo_cob_ids[n]);
            let event_driven = matches!(
                self.tpdo_types[n],
                TRANSMISSION_TYPE_EVENT_DRIVEN | TRANSMISSION_TYPE_DEVICE_PROFILE
            );
            if cob.is_disabled() || !event_driven {
                continue;
            }
            let sample = TpdoSample {
                status_word: current.0,
                position: Some(current.1),
            };
            out.push(sample.to_frame(channel, cob));
            emitted = true;
        }
        if emitted {
            self.last_emitted = Some(current);
        }
    }
}
