//! # drive402 CAN Adapter Layer
//!
//! CAN 硬件抽象层：上层只依赖 `CanAdapter` / `SplittableAdapter` trait，
//! 具体后端为 Linux SocketCAN 或模拟驱动器（`mock` feature）。

use std::time::Duration;
use thiserror::Error;

pub use drive402_protocol::CanopenFrame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::{SocketCanAdapter, SocketCanRxAdapter, SocketCanTxAdapter};

#[cfg(feature = "mock")]
pub mod mock;

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Bus off")]
    BusOff,
    #[error("Device not started")]
    NotStarted,
}

impl CanError {
    /// 是否为致命错误（接收线程应退出）
    pub fn is_fatal(&self) -> bool {
        match self {
            CanError::Timeout => false,
            CanError::Device(e) => e.is_fatal(),
            CanError::BusOff | CanError::NotStarted => true,
            CanError::Io(_) => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    NotFound,
    InterfaceDown,
    InvalidFrame,
    Closed,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CanDeviceErrorKind::NotFound
                | CanDeviceErrorKind::InterfaceDown
                | CanDeviceErrorKind::Closed
        )
    }
}

impl From<String> for CanDeviceError {
    fn from(message: String) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for CanDeviceError {
    fn from(message: &str) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

pub trait CanAdapter {
    fn send(&mut self, frame: CanopenFrame) -> Result<(), CanError>;
    fn receive(&mut self) -> Result<CanopenFrame, CanError>;
    fn set_receive_timeout(&mut self, _timeout: Duration) {}
    fn receive_timeout(&mut self, timeout: Duration) -> Result<CanopenFrame, CanError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }
}

/// 只读半边（接收线程持有）
pub trait RxAdapter {
    fn receive(&mut self) -> Result<CanopenFrame, CanError>;
}

/// 只写半边（命令线程持有）
pub trait TxAdapter {
    fn send(&mut self, frame: CanopenFrame) -> Result<(), CanError>;
}

pub trait SplittableAdapter: CanAdapter {
    type RxAdapter: RxAdapter + Send + 'static;
    type TxAdapter: TxAdapter + Send + 'static;
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError>;
}
