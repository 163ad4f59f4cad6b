//! SocketCAN CAN 适配器实现
//!
//! Linux 内核 SocketCAN 接口。波特率等配置由系统工具（`ip link`）完成，
//! 不在应用层设置；接口必须已处于 UP 状态。
//!
//! - 只收发标准帧（CANopen 预定义连接集只用 11 位 ID）
//! - 自动过滤错误帧，Bus-Off 作为致命错误上报
//! - 读超时通过 `SO_RCVTIMEO` 实现，超时返回 `CanError::Timeout`

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, CanopenFrame};
use socketcan::{
    CanError as SocketCanError, CanErrorFrame, CanFrame, CanSocket, EmbeddedFrame, Frame, Socket,
    StandardId,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, trace, warn};

pub mod split;

pub use split::{SocketCanRxAdapter, SocketCanTxAdapter};

/// 默认读超时：接收线程据此周期性检查退出标志
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// 检查接口是否存在且处于 UP 状态
///
/// 读取 `/sys/class/net/<iface>/flags`（IFF_UP = 0x1），不需要特殊权限。
///
/// # 错误
/// - `CanError::Device`: 接口不存在（附带创建命令提示）
fn check_interface_status(interface: &str) -> Result<bool, CanError> {
    let path = format!("/sys/class/net/{}/flags", interface);
    let flags = std::fs::read_to_string(&path).map_err(|_| {
        CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::NotFound,
            format!(
                "CAN interface '{}' does not exist. Please create it first:\n  sudo ip link add dev {} type can",
                interface, interface
            ),
        ))
    })?;

    let flags = u32::from_str_radix(flags.trim().trim_start_matches("0x"), 16).map_err(|e| {
        CanError::Device(format!("Failed to parse interface flags '{}': {}", flags.trim(), e).into())
    })?;

    Ok(flags & 0x1 != 0)
}

/// CanopenFrame -> socketcan::CanFrame
pub(crate) fn to_can_frame(frame: &CanopenFrame) -> Result<CanFrame, CanError> {
    if frame.is_extended {
        return Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::InvalidFrame,
            format!("Extended frame 0x{:X} is not used by CANopen", frame.id),
        )));
    }
    StandardId::new(frame.id as u16)
        .and_then(|id| CanFrame::new(id, frame.data_slice()))
        .ok_or_else(|| {
            CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::InvalidFrame,
                format!("Failed to create standard frame with ID 0x{:X}", frame.id),
            ))
        })
}

/// 从 socket 读取一个有效数据帧（错误帧与扩展帧被丢弃）
pub(crate) fn read_data_frame(socket: &CanSocket) -> Result<CanopenFrame, CanError> {
    loop {
        let can_frame = socket.read_frame().map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => CanError::Timeout,
            _ => CanError::Io(e),
        })?;

        if can_frame.is_error_frame() {
            match CanErrorFrame::try_from(can_frame) {
                Ok(error_frame) => match SocketCanError::from(error_frame) {
                    SocketCanError::BusOff => {
                        error!("CAN Bus Off error detected");
                        return Err(CanError::BusOff);
                    },
                    other => {
                        warn!("CAN Error Frame received: {}, ignoring", other);
                        continue;
                    },
                },
                Err(_) => {
                    warn!("Received CAN error frame but failed to parse, ignoring");
                    continue;
                },
            }
        }

        if can_frame.is_extended() {
            trace!("Ignoring extended frame 0x{:X}", can_frame.raw_id());
            continue;
        }

        let mut frame = CanopenFrame::new_standard(can_frame.raw_id() as u16, can_frame.data());
        frame.timestamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        return Ok(frame);
    }
}

/// SocketCAN 适配器
///
/// ```no_run
/// use drive402_can::{CanAdapter, CanopenFrame, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::new("can0")?;
/// adapter.send(CanopenFrame::new_standard(0x000, &[0x81, 0x00]))?;
/// let frame = adapter.receive()?;
/// # Ok::<(), drive402_can::CanError>(())
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    socket: CanSocket,
    /// 接口名称（如 "can0"）
    interface: String,
    read_timeout: Duration,
}

impl SocketCanAdapter {
    /// 打开 SocketCAN 接口
    ///
    /// # 参数
    /// - `interface`: CAN 接口名称（如 "can0" 或 "vcan0"）
    ///
    /// # 错误
    /// - `CanError::Device`: 接口不存在、未启动或无法打开
    /// - `CanError::Io`: 设置 socket 选项失败
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();

        if !check_interface_status(&interface)? {
            return Err(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::InterfaceDown,
                format!(
                    "CAN interface '{}' exists but is not UP. Please start it first:\n  sudo ip link set up {}",
                    interface, interface
                ),
            )));
        }

        let socket = CanSocket::open(&interface).map_err(|e| {
            CanError::Device(format!("Failed to open CAN interface '{}': {}", interface, e).into())
        })?;

        socket.set_read_timeout(DEFAULT_READ_TIMEOUT).map_err(CanError::Io)?;

        trace!("SocketCAN interface '{}' opened", interface);

        Ok(Self {
            socket,
            interface,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), CanError> {
        // SO_RCVTIMEO 为 0 表示永久阻塞，用 1µs 近似非阻塞读
        let effective = timeout.max(Duration::from_micros(1));
        self.socket.set_read_timeout(effective).map_err(CanError::Io)?;
        self.read_timeout = timeout;
        Ok(())
    }
}

impl Drop for SocketCanAdapter {
    fn drop(&mut self) {
        trace!("[Auto-Drop] SocketCAN interface '{}' closed", self.interface);
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: CanopenFrame) -> Result<(), CanError> {
        let can_frame = to_can_frame(&frame)?;
        self.socket.write_frame(&can_frame).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "SocketCAN transmit error: {}",
                e
            )))
        })?;
        trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }

    fn receive(&mut self) -> Result<CanopenFrame, CanError> {
        let frame = read_data_frame(&self.socket)?;
        trace!("Received CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(frame)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        if let Err(e) = self.set_read_timeout(timeout) {
            warn!("Failed to set receive timeout: {}", e);
        }
    }
}

impl crate::SplittableAdapter for SocketCanAdapter {
    type RxAdapter = SocketCanRxAdapter;
    type TxAdapter = SocketCanTxAdapter;

    /// 分离为独立的 RX 和 TX 适配器
    ///
    /// 两个半边通过 `try_clone()`（`dup()`）共享同一个打开文件描述：
    /// 严禁在分离后使用 `set_nonblocking()`，超时只能依赖 `SO_RCVTIMEO`。
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError> {
        let rx = SocketCanRxAdapter::new(&self.socket, self.read_timeout)?;
        let tx = SocketCanTxAdapter::new(&self.socket)?;
        trace!(
            "SocketCanAdapter split into RX and TX adapters (interface: {})",
            self.interface
        );
        Ok((rx, tx))
    }
}
