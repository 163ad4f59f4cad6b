//! 驱动器会话与运动命令协议
//!
//! [`Drive`] 拥有一个已连接的节点、一个传输模式和遥测存储。
//! 每个命令都是固定顺序的寄存器写入序列：
//!
//! | 命令 | 控制字序列 |
//! |---|---|
//! | enable | 0x06 → 0x07 → 0x0F，然后 SDO 读状态字确认 |
//! | disable | 0x06 |
//! | home | 0x0F+模式6 → 0x1F+模式6 → 校验 bit10/bit12 → 0x0F+模式1 |
//! | move | 目标+0x0F → 0x0F → 0x1F |
//!
//! 运动由控制字 bit4 的上升沿触发，因此每次拉高前都先写一次低电平。
//! 前置条件在本地检查，失败时不发出任何写入。

use crate::config::{DriveConfig, Settle};
use crate::pdo_config::{PdoChannelMap, configure_channels};
use crate::poller::{ActivePolling, StatusSource, TelemetryWatch, WaitOutcome};
use crate::transport::{CommandFrame, CommandTransport, TransportMode, transport_for};
use crate::{DriveError, Precondition, TelemetryStore, poller};
use drive402_can::SplittableAdapter;
use drive402_driver::{CanopenNode, NodeClient, NodeConfig};
use drive402_protocol::{
    ACTUAL_POSITION, BROADCAST_NODE, ControlCommand, DriveState, HOMING_METHOD,
    MODES_OF_OPERATION, NmtCommand, OdEntry, OperationMode, PROFILE_ACCELERATION,
    PROFILE_DECELERATION, PROFILE_VELOCITY, STATUS_WORD, state_from_status,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CW_ENABLE_OPERATION: u16 = ControlCommand::EnableOperation.raw();
const CW_NEW_SETPOINT: u16 = ControlCommand::NewSetpoint.raw();

/// `status` 命令的读数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveStatus {
    pub status_word: u16,
    pub position: i32,
    pub mode: OperationMode,
    pub state: DriveState,
    pub transport: TransportMode,
}

/// 轮廓运动参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionParameters {
    pub velocity: i32,
    pub acceleration: u32,
    pub deceleration: u32,
}

/// 回零结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomingReport {
    /// 校验时最后读到的状态字
    pub status_word: u16,
    /// bit10 与 bit12 是否同时置位
    pub attained: bool,
}

/// 驱动器会话
pub struct Drive {
    node: Box<dyn NodeClient>,
    config: DriveConfig,
    transport: Box<dyn CommandTransport>,
    pdo_map: PdoChannelMap,
    telemetry: Arc<TelemetryStore>,
    enabled: bool,
    /// 最近一次触发沿之前的遥测代数
    trigger_generation: u64,
}

impl Drive {
    /// 通过 CAN 适配器建立会话
    ///
    /// # 错误
    /// - `DriveError::Connection`: 节点客户端创建失败
    /// - 其余同 [`Drive::connect_node`]
    pub fn connect<C>(adapter: C, config: DriveConfig) -> Result<Self, DriveError>
    where
        C: SplittableAdapter + Send + 'static,
    {
        let node_config = NodeConfig {
            sdo_timeout: config.connection.sdo_timeout,
        };
        let node = CanopenNode::new(adapter, config.connection.node_id, node_config).map_err(
            |source| DriveError::Connection {
                interface: config.connection.interface.clone(),
                source,
            },
        )?;
        Self::connect_node(Box::new(node), config)
    }

    /// 打开配置中的 SocketCAN 接口并建立会话
    #[cfg(target_os = "linux")]
    pub fn open(config: DriveConfig) -> Result<Self, DriveError> {
        let adapter = drive402_can::SocketCanAdapter::new(config.connection.interface.clone())
            .map_err(|e| DriveError::Connection {
                interface: config.connection.interface.clone(),
                source: e.into(),
            })?;
        Self::connect(adapter, config)
    }

    /// 在已有节点客户端上执行连接流程
    ///
    /// 1. 广播 NMT 复位，等待 bootup
    /// 2. 配置 PDO 通道，注册 TPDO 遥测
    /// 3. NMT 启动节点（进入运行状态）
    ///
    /// # 错误
    /// - `DriveError::BootTimeout`: bootup 时间窗内无响应
    /// - `DriveError::DeviceRejected` / `DriveError::Transport`: PDO 配置失败
    pub fn connect_node(node: Box<dyn NodeClient>, config: DriveConfig) -> Result<Self, DriveError> {
        let node_id = node.node_id();
        let bootup_timeout = config.connection.bootup_timeout;

        info!("Resetting CANopen network");
        node.nmt_command(NmtCommand::ResetNode, BROADCAST_NODE)?;
        node.wait_for_bootup(bootup_timeout).map_err(|e| match e {
            drive402_driver::DriverError::BootupTimeout { timeout, .. } => {
                DriveError::BootTimeout { timeout }
            },
            other => DriveError::Transport(other),
        })?;
        debug!("Node {} booted", node_id);

        let pdo_map = configure_channels(node.as_ref())?;
        let telemetry = Arc::new(TelemetryStore::new());
        telemetry.attach(node.as_ref(), pdo_map.tpdo);

        node.nmt_command(NmtCommand::StartRemoteNode, node_id)?;

        let transport = transport_for(
            config.connection.transport,
            node_id,
            pdo_map.rpdo,
            config.pdo_delays,
        );
        info!("Node {} connected ({} transport)", node_id, transport.mode());

        Ok(Self {
            node,
            config,
            transport,
            pdo_map,
            telemetry,
            enabled: false,
            trigger_generation: 0,
        })
    }

    /// 断开会话
    ///
    /// 若处于使能状态先执行 disable（失败只记录日志），然后广播进入预运行状态。
    pub fn disconnect(mut self) {
        if self.enabled
            && let Err(e) = self.disable()
        {
            warn!("Disable before disconnect failed: {}", e);
        }
        if let Err(e) = self
            .node
            .nmt_command(NmtCommand::EnterPreOperational, BROADCAST_NODE)
        {
            warn!("Failed to send NMT pre-operational: {}", e);
        }
        std::thread::sleep(self.config.connection.disconnect_settle);
        self.node.clear_pdo_listeners();
        info!("Node {} disconnected", self.node.node_id());
    }

    pub fn node_id(&self) -> u8 {
        self.node.node_id()
    }

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn transport_mode(&self) -> TransportMode {
        self.transport.mode()
    }

    /// 切换传输模式，从下一条命令开始生效
    pub fn set_transport(&mut self, mode: TransportMode) {
        self.transport = transport_for(
            mode,
            self.node.node_id(),
            self.pdo_map.rpdo,
            self.config.pdo_delays,
        );
        info!("Transport switched to {}", mode);
    }

    pub fn pdo_map(&self) -> &PdoChannelMap {
        &self.pdo_map
    }

    pub fn telemetry(&self) -> &TelemetryStore {
        &self.telemetry
    }

    /// `enabled` 标志（镜像，不代表设备真实状态）
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn read(&self, entry: &OdEntry) -> Result<i64, DriveError> {
        self.node
            .sdo_read(entry)
            .map_err(|e| DriveError::from_access(e, entry, None))
    }

    fn write(&self, entry: &OdEntry, value: i64) -> Result<(), DriveError> {
        self.node
            .sdo_write(entry, value)
            .map_err(|e| DriveError::from_access(e, entry, Some(value)))
    }

    fn command(&mut self, frame: CommandFrame, settle: Settle) -> Result<(), DriveError> {
        self.transport.write_command(self.node.as_ref(), frame, settle)
    }

    fn read_status_word(&self) -> Result<u16, DriveError> {
        let status_word = self.read(&STATUS_WORD)? as u16;
        self.telemetry.record_status(status_word);
        Ok(status_word)
    }

    /// 运动前置条件：`enabled` 标志与最近观测的状态都必须为使能
    fn require_enabled(&self) -> Result<(), DriveError> {
        if self.enabled && self.telemetry.state().can_accept_motion() {
            Ok(())
        } else {
            Err(Precondition::NotEnabled.into())
        }
    }

    /// 使能驱动器
    ///
    /// 返回确认时读到的状态字。
    ///
    /// # 错误
    /// - `Precondition::AlreadyEnabled`: 已使能，未发出任何写入
    /// - `DriveError::UnexpectedState`: 序列完成后状态不是 Operation enabled
    pub fn enable(&mut self) -> Result<u16, DriveError> {
        if self.enabled && self.telemetry.state().can_accept_motion() {
            return Err(Precondition::AlreadyEnabled.into());
        }

        info!("Enabling drive");
        let sequence = [
            (ControlCommand::Shutdown, Settle::Shutdown),
            (ControlCommand::SwitchOn, Settle::SwitchOn),
            (ControlCommand::EnableOperation, Settle::EnableOperation),
        ];
        for (command, settle) in sequence {
            self.command(
                CommandFrame::Control {
                    control_word: command.raw(),
                },
                settle,
            )?;
        }

        let status_word = self.read_status_word()?;
        let observed = state_from_status(status_word);
        if observed != DriveState::OperationEnabled {
            self.enabled = false;
            return Err(DriveError::UnexpectedState {
                expected: DriveState::OperationEnabled,
                observed,
                status_word,
            });
        }

        self.enabled = true;
        info!("Drive enabled, status word 0x{:04X}", status_word);
        Ok(status_word)
    }

    /// 去使能（Shutdown），不校验结果
    pub fn disable(&mut self) -> Result<(), DriveError> {
        info!("Disabling drive");
        let result = self.command(
            CommandFrame::Control {
                control_word: ControlCommand::Shutdown.raw(),
            },
            Settle::Disable,
        );
        self.enabled = false;
        result
    }

    /// 以当前位置为零点回零
    ///
    /// 无论校验是否通过，最后都恢复轮廓位置模式并拉低 bit4。
    ///
    /// # 错误
    /// - `Precondition::NotEnabled`: 未使能，未发出任何写入
    pub fn home(&mut self) -> Result<HomingReport, DriveError> {
        self.require_enabled()?;
        let homing = OperationMode::Homing.raw();
        info!("Homing with method {}", self.config.homing.method);

        self.write(&HOMING_METHOD, self.config.homing.method as i64)?;
        self.command(
            CommandFrame::ControlWithMode {
                control_word: CW_ENABLE_OPERATION,
                mode: homing,
            },
            Settle::HomingMode,
        )?;
        let started = self.command(
            CommandFrame::ControlWithMode {
                control_word: CW_NEW_SETPOINT,
                mode: homing,
            },
            Settle::HomingStart,
        );

        let verified = started.and_then(|_| self.verify_homing());
        let restored = self.command(
            CommandFrame::ControlWithMode {
                control_word: CW_ENABLE_OPERATION,
                mode: OperationMode::ProfilePosition.raw(),
            },
            Settle::HomingRestore,
        );

        match (verified, restored) {
            (Ok(report), Ok(())) => {
                if report.attained {
                    info!("Homing attained, status word 0x{:04X}", report.status_word);
                } else {
                    warn!("Homing not attained, status word 0x{:04X}", report.status_word);
                }
                Ok(report)
            },
            (Ok(_), Err(e)) => Err(e),
            (Err(e), restore) => {
                if let Err(restore_err) = restore {
                    warn!("Restoring profile position mode failed: {}", restore_err);
                }
                Err(e)
            },
        }
    }

    fn verify_homing(&self) -> Result<HomingReport, DriveError> {
        let mut source = ActivePolling::new(self.node.as_ref(), self.config.poll.poll_interval)
            .recording_into(&self.telemetry);
        let outcome = poller::wait_until(
            &mut source,
            poller::homing_complete,
            self.config.homing.verify_timeout,
        );
        match outcome {
            WaitOutcome::Reached { status_word, .. } => Ok(HomingReport {
                status_word,
                attained: true,
            }),
            WaitOutcome::TimedOut {
                last_status: Some(status_word),
                ..
            } => Ok(HomingReport {
                status_word,
                attained: false,
            }),
            WaitOutcome::TimedOut {
                last_status: None, ..
            } => Ok(HomingReport {
                status_word: self.read_status_word()?,
                attained: false,
            }),
        }
    }

    /// 绝对位置运动，触发沿发出后立即返回
    ///
    /// # 错误
    /// - `Precondition::NotEnabled`: 未使能，未发出任何写入
    /// - `DriveError::DeviceRejected`: 设备拒绝目标位置
    pub fn move_to(&mut self, target: i32) -> Result<(), DriveError> {
        self.require_enabled()?;
        info!("Moving to {}", target);

        self.command(
            CommandFrame::ControlWithTarget {
                control_word: CW_ENABLE_OPERATION,
                target: Some(target),
            },
            Settle::MoveLatch,
        )?;
        self.command(
            CommandFrame::ControlWithTarget {
                control_word: CW_ENABLE_OPERATION,
                target: None,
            },
            Settle::MoveClear,
        )?;
        self.trigger_generation = self.telemetry.snapshot().generation;
        self.command(
            CommandFrame::ControlWithTarget {
                control_word: CW_NEW_SETPOINT,
                target: None,
            },
            Settle::Immediate,
        )
    }

    /// 等待目标到达（bit10）
    ///
    /// SDO 模式主动轮询状态字；PDO 模式等待 TPDO 遥测。
    pub fn wait(&self, timeout: Duration) -> Result<WaitOutcome, DriveError> {
        self.require_enabled()?;
        let outcome = match self.transport.mode() {
            TransportMode::Sdo => {
                let mut source =
                    ActivePolling::new(self.node.as_ref(), self.config.poll.poll_interval)
                        .recording_into(&self.telemetry);
                self.wait_with(&mut source, timeout)
            },
            TransportMode::Pdo => {
                let mut source = TelemetryWatch::new(&self.telemetry, self.trigger_generation);
                self.wait_with(&mut source, timeout)
            },
        };
        Ok(outcome)
    }

    /// 使用指定观测来源等待目标到达
    pub fn wait_with<S>(&self, source: &mut S, timeout: Duration) -> WaitOutcome
    where
        S: StatusSource + ?Sized,
    {
        let outcome = poller::wait_until(source, poller::target_reached, timeout);
        match &outcome {
            WaitOutcome::Reached { position, .. } => {
                info!("Target reached at {:?}", position)
            },
            WaitOutcome::TimedOut { last_status, .. } => {
                warn!("Target not reached within {:?} (last status {:04X?})", timeout, last_status)
            },
        }
        outcome
    }

    /// 读取状态字、实际位置与运行模式
    pub fn status(&self) -> Result<DriveStatus, DriveError> {
        let status_word = self.read_status_word()?;
        let position = self.position()?;
        let mode = OperationMode::from(self.read(&MODES_OF_OPERATION)? as i8);
        Ok(DriveStatus {
            status_word,
            position,
            mode,
            state: state_from_status(status_word),
            transport: self.transport.mode(),
        })
    }

    /// 读取实际位置（0x6064）
    pub fn position(&self) -> Result<i32, DriveError> {
        let position = self.read(&ACTUAL_POSITION)? as i32;
        self.telemetry.record_position(position);
        Ok(position)
    }

    pub fn set_velocity(&mut self, velocity: i32) -> Result<(), DriveError> {
        self.write(&PROFILE_VELOCITY, velocity as i64)
    }

    pub fn set_acceleration(&mut self, acceleration: u32) -> Result<(), DriveError> {
        self.write(&PROFILE_ACCELERATION, acceleration as i64)
    }

    pub fn set_deceleration(&mut self, deceleration: u32) -> Result<(), DriveError> {
        self.write(&PROFILE_DECELERATION, deceleration as i64)
    }

    pub fn parameters(&self) -> Result<MotionParameters, DriveError> {
        Ok(MotionParameters {
            velocity: self.read(&PROFILE_VELOCITY)? as i32,
            acceleration: self.read(&PROFILE_ACCELERATION)? as u32,
            deceleration: self.read(&PROFILE_DECELERATION)? as u32,
        })
    }
}

impl std::fmt::Debug for Drive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drive")
            .field("node_id", &self.node.node_id())
            .field("transport", &self.transport.mode())
            .field("enabled", &self.enabled)
            .field("telemetry", &self.telemetry.snapshot())
            .finish()
    }
}
