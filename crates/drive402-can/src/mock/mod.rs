//! 模拟 CAN 总线
//!
//! 总线上只有一个 [`SimulatedDrive`]：发送的帧同步交给设备处理，
//! 设备应答与事件驱动的 TPDO 进入接收队列。
//! 适配器可分离为 RX/TX 两半，行为与 SocketCAN 后端一致。

mod device;

pub use device::{
    DeviceEvent, PdoConfigSnapshot, SimulatedDrive, SimulatedDriveConfig, WriteSource,
};

use crate::{CanAdapter, CanError, CanopenFrame, RxAdapter, SplittableAdapter, TxAdapter};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// 接收端轮询设备的粒度（推动模拟运动）
const TICK: Duration = Duration::from_millis(2);

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

struct BusInner {
    device: SimulatedDrive,
    outbox: VecDeque<CanopenFrame>,
}

struct MockBus {
    inner: Mutex<BusInner>,
    ready: Condvar,
}

impl MockBus {
    fn transmit(&self, frame: CanopenFrame) {
        let mut inner = self.inner.lock();
        let responses = inner.device.handle_frame(&frame, Instant::now());
        trace!(
            "MOCK TX: ID=0x{:X}, len={}, {} response(s)",
            frame.id,
            frame.len,
            responses.len()
        );
        if !responses.is_empty() {
            inner.outbox.extend(responses);
            self.ready.notify_all();
        }
    }

    fn receive(&self, timeout: Duration) -> Result<CanopenFrame, CanError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            let now = Instant::now();
            let telemetry = inner.device.poll(now);
            inner.outbox.extend(telemetry);

            if let Some(frame) = inner.outbox.pop_front() {
                return Ok(frame);
            }
            if now >= deadline {
                return Err(CanError::Timeout);
            }
            let wait = TICK.min(deadline - now);
            let _ = self.ready.wait_for(&mut inner, wait);
        }
    }
}

/// 模拟驱动器句柄，用于在测试中检查或操纵设备
#[derive(Clone)]
pub struct MockDriveHandle {
    bus: Arc<MockBus>,
}

impl MockDriveHandle {
    /// 在设备上执行闭包
    pub fn with_device<R>(&self, f: impl FnOnce(&mut SimulatedDrive) -> R) -> R {
        f(&mut self.bus.inner.lock().device)
    }

    pub fn journal(&self) -> Vec<DeviceEvent> {
        self.with_device(|d| d.journal().to_vec())
    }

    pub fn clear_journal(&self) {
        self.with_device(|d| d.clear_journal());
    }

    pub fn status_word(&self) -> u16 {
        self.with_device(|d| d.status_word())
    }

    pub fn position(&self) -> i32 {
        self.with_device(|d| d.position())
    }

    /// 直接向接收队列注入一帧
    pub fn inject(&self, frame: CanopenFrame) {
        self.bus.inner.lock().outbox.push_back(frame);
        self.bus.ready.notify_all();
    }
}

/// 连接模拟驱动器的 CAN 适配器
///
/// ```
/// use drive402_can::CanAdapter;
/// use drive402_can::mock::{MockCanAdapter, SimulatedDriveConfig};
/// use drive402_protocol::NmtCommand;
///
/// let (mut adapter, _handle) = MockCanAdapter::new(SimulatedDriveConfig::default());
/// adapter.send(NmtCommand::ResetNode.to_frame(0))?;
/// let bootup = adapter.receive()?;
/// assert_eq!(bootup.id, 0x702);
/// # Ok::<(), drive402_can::CanError>(())
/// ```
pub struct MockCanAdapter {
    bus: Arc<MockBus>,
    read_timeout: Duration,
}

impl MockCanAdapter {
    pub fn new(config: SimulatedDriveConfig) -> (Self, MockDriveHandle) {
        let bus = Arc::new(MockBus {
            inner: Mutex::new(BusInner {
                device: SimulatedDrive::new(config),
                outbox: VecDeque::new(),
            }),
            ready: Condvar::new(),
        });
        let handle = MockDriveHandle { bus: bus.clone() };
        (
            Self {
                bus,
                read_timeout: DEFAULT_READ_TIMEOUT,
            },
            handle,
        )
    }

    pub fn handle(&self) -> MockDriveHandle {
        MockDriveHandle {
            bus: self.bus.clone(),
        }
    }
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: CanopenFrame) -> Result<(), CanError> {
        self.bus.transmit(frame);
        Ok(())
    }

    fn receive(&mut self) -> Result<CanopenFrame, CanError> {
        self.bus.receive(self.read_timeout)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }
}

impl SplittableAdapter for MockCanAdapter {
    type RxAdapter = MockRxAdapter;
    type TxAdapter = MockTxAdapter;

    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError> {
        let rx = MockRxAdapter {
            bus: self.bus.clone(),
            read_timeout: self.read_timeout,
        };
        let tx = MockTxAdapter { bus: self.bus };
        Ok((rx, tx))
    }
}

pub struct MockRxAdapter {
    bus: Arc<MockBus>,
    read_timeout: Duration,
}

impl RxAdapter for MockRxAdapter {
    fn receive(&mut self) -> Result<CanopenFrame, CanError> {
        self.bus.receive(self.read_timeout)
    }
}

pub struct MockTxAdapter {
    bus: Arc<MockBus>,
}

impl TxAdapter for MockTxAdapter {
    fn send(&mut self, frame: CanopenFrame) -> Result<(), CanError> {
        self.bus.transmit(frame);
        Ok(())
    }
}
