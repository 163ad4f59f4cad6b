//! SocketCAN 适配器分离实现
//!
//! RX 与 TX 各持有一个 `CanSocket::try_clone()` 得到的 FD，
//! 可以分别交给接收线程和命令线程并发使用。

use super::{read_data_frame, to_can_frame};
use crate::{CanError, CanopenFrame, RxAdapter, TxAdapter};
use socketcan::{CanSocket, Socket};
use std::os::fd::AsFd;
use std::time::Duration;
use tracing::trace;

fn clone_socket(socket: &CanSocket, role: &str) -> Result<CanSocket, CanError> {
    socket.as_fd().try_clone_to_owned().map(CanSocket::from).map_err(|e| {
        CanError::Io(std::io::Error::other(format!(
            "Failed to clone SocketCAN socket for {}: {}",
            role, e
        )))
    })
}

/// 只读适配器（接收线程持有）
pub struct SocketCanRxAdapter {
    socket: CanSocket,
    read_timeout: Duration,
}

impl SocketCanRxAdapter {
    pub fn new(socket: &CanSocket, read_timeout: Duration) -> Result<Self, CanError> {
        let socket = clone_socket(socket, "RX")?;
        socket
            .set_read_timeout(read_timeout.max(Duration::from_micros(1)))
            .map_err(CanError::Io)?;
        Ok(Self {
            socket,
            read_timeout,
        })
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

impl RxAdapter for SocketCanRxAdapter {
    fn receive(&mut self) -> Result<CanopenFrame, CanError> {
        let frame = read_data_frame(&self.socket)?;
        trace!("RX: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(frame)
    }
}

/// 只写适配器（命令线程持有）
pub struct SocketCanTxAdapter {
    socket: CanSocket,
}

impl SocketCanTxAdapter {
    pub fn new(socket: &CanSocket) -> Result<Self, CanError> {
        Ok(Self {
            socket: clone_socket(socket, "TX")?,
        })
    }
}

impl TxAdapter for SocketCanTxAdapter {
    fn send(&mut self, frame: CanopenFrame) -> Result<(), CanError> {
        let can_frame = to_can_frame(&frame)?;
        self.socket.write_frame(&can_frame).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "SocketCAN transmit error: {}",
                e
            )))
        })?;
        trace!("TX: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }
}
