//! CANopen 节点客户端
//!
//! [`CanopenNode`] 将可分离的 CAN 适配器拆成 RX/TX 两半：
//! RX 半边交给后台线程，TX 半边由命令线程在锁内使用。
//!
//! 后台线程把收到的帧分为三类：
//! - SDO 应答（0x580 + node）：经 crossbeam 通道交给等待中的 SDO 事务
//! - bootup 报文（0x700 + node, 数据 0x00）：经通道交给 `wait_for_bootup`
//! - 其余帧：按 COB-ID 分发给已注册的监听回调（TPDO 遥测）
//!
//! SDO 事务串行执行：同一时刻只允许一个请求在途。

use crate::DriverError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use drive402_can::{CanError, CanopenFrame, RxAdapter, SplittableAdapter, TxAdapter};
use drive402_protocol::{
    NmtCommand, NmtState, OdEntry, SdoRequest, SdoResponse, sdo_response_cob_id,
    validate_node_id,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// PDO 监听回调（在 RX 线程中执行，必须快速返回）
pub type PdoCallback = Box<dyn Fn(&CanopenFrame) + Send + Sync>;

/// 寄存器访问接口
///
/// 运动命令协议只依赖该 trait，测试可以用记录型假节点替换真实节点。
pub trait NodeClient: Send + Sync {
    fn node_id(&self) -> u8;

    /// SDO 读取对象值（按条目数据类型解码并符号扩展）
    fn sdo_read(&self, entry: &OdEntry) -> Result<i64, DriverError>;

    /// SDO 写入对象值，等待设备确认
    fn sdo_write(&self, entry: &OdEntry, value: i64) -> Result<(), DriverError>;

    /// 发送 NMT 命令（`node_id == 0` 为广播）
    fn nmt_command(&self, command: NmtCommand, node_id: u8) -> Result<(), DriverError>;

    /// 等待本节点的 bootup 报文
    fn wait_for_bootup(&self, timeout: Duration) -> Result<(), DriverError>;

    /// 发送一个 RPDO 帧（无确认）
    fn pdo_transmit(&self, frame: CanopenFrame) -> Result<(), DriverError>;

    /// 注册 COB-ID 监听回调
    fn add_pdo_listener(&self, cob_id: u32, callback: PdoCallback);

    /// 移除所有监听回调
    fn clear_pdo_listeners(&self);
}

/// 节点客户端配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    /// 单次 SDO 事务超时
    pub sdo_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sdo_timeout: Duration::from_millis(500),
        }
    }
}

type ListenerMap = HashMap<u32, Vec<PdoCallback>>;

/// 基于 CAN 适配器的节点客户端
pub struct CanopenNode {
    node_id: u8,
    config: NodeConfig,
    tx: Mutex<Box<dyn TxAdapter + Send>>,
    /// SDO 应答接收端；持有该锁即持有 SDO 通道
    sdo_rx: Mutex<Receiver<SdoResponse>>,
    bootup_rx: Receiver<()>,
    listeners: Arc<RwLock<ListenerMap>>,
    is_running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl CanopenNode {
    /// 创建节点客户端并启动 RX 线程
    ///
    /// # 参数
    /// - `can`: 可分离的 CAN 适配器（被消费）
    /// - `node_id`: 目标节点号（1..=127）
    /// - `config`: SDO 超时等参数
    ///
    /// # 错误
    /// - `DriverError::Protocol`: 节点号非法
    /// - `DriverError::Can`: 适配器分离失败
    pub fn new<C>(can: C, node_id: u8, config: NodeConfig) -> Result<Self, DriverError>
    where
        C: SplittableAdapter + Send + 'static,
    {
        let node_id = validate_node_id(node_id)?;
        let (rx_adapter, tx_adapter) = can.split()?;

        let (sdo_tx, sdo_rx) = crossbeam_channel::unbounded();
        let (bootup_tx, bootup_rx) = crossbeam_channel::unbounded();
        let listeners: Arc<RwLock<ListenerMap>> = Arc::new(RwLock::new(HashMap::new()));
        let is_running = Arc::new(AtomicBool::new(true));

        let dispatch = Dispatch {
            node_id,
            sdo_tx,
            bootup_tx,
            listeners: listeners.clone(),
        };
        let is_running_rx = is_running.clone();
        let rx_thread = spawn(move || rx_loop(rx_adapter, dispatch, is_running_rx));

        debug!("CANopen node client for node {} started", node_id);

        Ok(Self {
            node_id,
            config,
            tx: Mutex::new(Box::new(tx_adapter)),
            sdo_rx: Mutex::new(sdo_rx),
            bootup_rx,
            listeners,
            is_running,
            rx_thread: Some(rx_thread),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// RX 线程是否仍在运行
    pub fn is_healthy(&self) -> bool {
        self.rx_thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn send(&self, frame: CanopenFrame) -> Result<(), DriverError> {
        self.tx.lock().send(frame)?;
        Ok(())
    }

    /// 执行一次 SDO 事务，返回与请求地址匹配的应答
    fn sdo_transaction(&self, request: SdoRequest) -> Result<SdoResponse, DriverError> {
        let (index, sub_index) = match request {
            SdoRequest::Upload { index, sub_index }
            | SdoRequest::Download {
                index, sub_index, ..
            }
            | SdoRequest::Abort {
                index, sub_index, ..
            } => (index, sub_index),
        };

        let sdo_rx = self.sdo_rx.lock();
        // 丢弃上一次超时事务残留的应答
        while sdo_rx.try_recv().is_ok() {}

        self.send(request.to_frame(self.node_id))?;

        let deadline = Instant::now() + self.config.sdo_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match sdo_rx.recv_timeout(remaining) {
                Ok(response) if response.address() == (index, sub_index) => return Ok(response),
                Ok(response) => {
                    trace!("Discarding SDO response for {:04X?}", response.address());
                },
                Err(RecvTimeoutError::Timeout) => {
                    return Err(DriverError::SdoTimeout {
                        index,
                        sub_index,
                        timeout: self.config.sdo_timeout,
                    });
                },
                Err(RecvTimeoutError::Disconnected) => return Err(DriverError::ChannelClosed),
            }
        }
    }
}

impl NodeClient for CanopenNode {
    fn node_id(&self) -> u8 {
        self.node_id
    }

    fn sdo_read(&self, entry: &OdEntry) -> Result<i64, DriverError> {
        let response = self.sdo_transaction(SdoRequest::Upload {
            index: entry.index,
            sub_index: entry.sub_index,
        })?;
        match response {
            SdoResponse::Upload { data, len, .. } => {
                let len = (len as usize).min(data.len());
                let value = entry.decode(&data[..len])?;
                trace!("SDO read {} = {}", entry, value);
                Ok(value)
            },
            SdoResponse::Abort {
                index,
                sub_index,
                code,
            } => Err(DriverError::SdoAbort {
                index,
                sub_index,
                code,
            }),
            SdoResponse::DownloadAck { index, sub_index } => Err(DriverError::UnexpectedResponse {
                index,
                sub_index,
                detail: "download acknowledge to an upload request".to_string(),
            }),
        }
    }

    fn sdo_write(&self, entry: &OdEntry, value: i64) -> Result<(), DriverError> {
        let (data, len) = entry.encode(value)?;
        let response = self.sdo_transaction(SdoRequest::Download {
            index: entry.index,
            sub_index: entry.sub_index,
            data,
            len,
        })?;
        match response {
            SdoResponse::DownloadAck { .. } => {
                trace!("SDO write {} = {}", entry, value);
                Ok(())
            },
            SdoResponse::Abort {
                index,
                sub_index,
                code,
            } => Err(DriverError::SdoAbort {
                index,
                sub_index,
                code,
            }),
            SdoResponse::Upload {
                index, sub_index, ..
            } => Err(DriverError::UnexpectedResponse {
                index,
                sub_index,
                detail: "upload response to a download request".to_string(),
            }),
        }
    }

    fn nmt_command(&self, command: NmtCommand, node_id: u8) -> Result<(), DriverError> {
        if matches!(
            command,
            NmtCommand::ResetNode | NmtCommand::ResetCommunication
        ) {
            while self.bootup_rx.try_recv().is_ok() {}
        }
        debug!("NMT {:?} -> node {}", command, node_id);
        self.send(command.to_frame(node_id))
    }

    fn wait_for_bootup(&self, timeout: Duration) -> Result<(), DriverError> {
        match self.bootup_rx.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(DriverError::BootupTimeout {
                node_id: self.node_id,
                timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(DriverError::ChannelClosed),
        }
    }

    fn pdo_transmit(&self, frame: CanopenFrame) -> Result<(), DriverError> {
        trace!("RPDO TX: ID=0x{:03X}, data={:02X?}", frame.id, frame.data_slice());
        self.send(frame)
    }

    fn add_pdo_listener(&self, cob_id: u32, callback: PdoCallback) {
        self.listeners.write().entry(cob_id).or_default().push(callback);
    }

    fn clear_pdo_listeners(&self) {
        self.listeners.write().clear();
    }
}

impl Drop for CanopenNode {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Release);
        if let Some(handle) = self.rx_thread.take()
            && handle.join().is_err()
        {
            error!("RX thread of node {} panicked", self.node_id);
        }
        trace!("[Auto-Drop] CANopen node client {} closed", self.node_id);
    }
}

/// RX 线程持有的分发表
struct Dispatch {
    node_id: u8,
    sdo_tx: Sender<SdoResponse>,
    bootup_tx: Sender<()>,
    listeners: Arc<RwLock<ListenerMap>>,
}

impl Dispatch {
    fn dispatch(&self, frame: &CanopenFrame) {
        if frame.id == sdo_response_cob_id(self.node_id) as u32 {
            match SdoResponse::parse(frame) {
                Ok(response) => {
                    let _ = self.sdo_tx.send(response);
                },
                Err(e) => warn!("Malformed SDO response: {}", e),
            }
            return;
        }

        if let Some((node_id, state)) = NmtState::parse(frame) {
            if node_id == self.node_id && state == NmtState::BootUp {
                debug!("Bootup received from node {}", node_id);
                let _ = self.bootup_tx.send(());
            } else {
                trace!("Node {} reports NMT state {:?}", node_id, state);
            }
            return;
        }

        let listeners = self.listeners.read();
        if let Some(callbacks) = listeners.get(&frame.id) {
            for callback in callbacks {
                callback(frame);
            }
        }
    }
}

/// RX 线程主循环
///
/// 适配器读超时保证循环能周期性检查 `is_running`。
fn rx_loop(mut rx: impl RxAdapter, dispatch: Dispatch, is_running: Arc<AtomicBool>) {
    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("RX thread: is_running flag is false, exiting");
            break;
        }

        match rx.receive() {
            Ok(frame) => dispatch.dispatch(&frame),
            Err(CanError::Timeout) => continue,
            Err(e) if e.is_fatal() => {
                error!("RX thread: fatal CAN error, exiting: {}", e);
                break;
            },
            Err(e) => warn!("RX thread: CAN receive error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drive402_can::mock::{MockCanAdapter, SimulatedDriveConfig};
    use drive402_protocol::{PROFILE_VELOCITY, STATUS_WORD, SdoAbortCode, TARGET_POSITION};

    fn node() -> CanopenNode {
        let (adapter, _handle) = MockCanAdapter::new(SimulatedDriveConfig::default());
        CanopenNode::new(adapter, 2, NodeConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_node_id_rejected() {
        let (adapter, _handle) = MockCanAdapter::new(SimulatedDriveConfig::default());
        assert!(matches!(
            CanopenNode::new(adapter, 0, NodeConfig::default()),
            Err(DriverError::Protocol(_))
        ));
    }

    #[test]
    fn test_sdo_read_and_write() {
        let node = node();
        assert_eq!(node.sdo_read(&STATUS_WORD).unwrap() & 0x4F, 0x40);
        node.sdo_write(&PROFILE_VELOCITY, 12_345).unwrap();
        assert_eq!(node.sdo_read(&PROFILE_VELOCITY).unwrap(), 12_345);
    }

    #[test]
    fn test_sdo_abort_surfaces_code() {
        let node = node();
        let err = node.sdo_write(&TARGET_POSITION, 1000).unwrap_err();
        assert_eq!(err.abort_code(), Some(SdoAbortCode::INVALID_DEVICE_STATE));
    }

    #[test]
    fn test_bootup_after_reset() {
        let node = node();
        node.nmt_command(NmtCommand::ResetNode, 0).unwrap();
        node.wait_for_bootup(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_bootup_timeout_when_unresponsive() {
        let (adapter, handle) = MockCanAdapter::new(SimulatedDriveConfig::default());
        handle.with_device(|d| d.set_responsive(false));
        let node = CanopenNode::new(adapter, 2, NodeConfig::default()).unwrap();
        node.nmt_command(NmtCommand::ResetNode, 0).unwrap();
        let err = node.wait_for_bootup(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, DriverError::BootupTimeout { node_id: 2, .. }));
    }

    #[test]
    fn test_drop_joins_rx_thread() {
        let node = node();
        assert!(node.is_healthy());
        drop(node);
    }
}
