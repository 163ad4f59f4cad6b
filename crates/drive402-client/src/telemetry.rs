//! 遥测存储
//!
//! TPDO 回调（RX 线程）与 SDO 读取（命令线程）写入同一份快照，后写者生效。
//! 读取走 `ArcSwap` 无锁路径；等待新观测的一方通过代计数器 + `Condvar` 阻塞。

use arc_swap::ArcSwap;
use drive402_driver::NodeClient;
use drive402_protocol::{
    CanopenFrame, DriveState, PdoCobId, TpdoChannel, TpdoSample, state_from_status,
};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Instant;
use tracing::{trace, warn};

/// 遥测快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Telemetry {
    /// 最近一次观测到的状态字
    pub status_word: Option<u16>,
    /// 最近一次观测到的实际位置
    pub position: Option<i32>,
    /// 每次写入加一
    pub generation: u64,
    pub updated_at: Option<Instant>,
}

impl Telemetry {
    /// 由状态字推导的驱动器状态；从未观测时为 `Unknown`
    pub fn state(&self) -> DriveState {
        self.status_word
            .map(state_from_status)
            .unwrap_or(DriveState::Unknown)
    }
}

pub struct TelemetryStore {
    snapshot: ArcSwap<Telemetry>,
    generation: Mutex<u64>,
    changed: Condvar,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Telemetry::default()),
            generation: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    /// 当前快照（无锁）
    pub fn snapshot(&self) -> Telemetry {
        **self.snapshot.load()
    }

    pub fn state(&self) -> DriveState {
        self.snapshot().state()
    }

    pub fn record_status(&self, status_word: u16) {
        self.update(|t| t.status_word = Some(status_word));
    }

    pub fn record_position(&self, position: i32) {
        self.update(|t| t.position = Some(position));
    }

    /// 记录一次 TPDO 观测
    pub fn record_sample(&self, sample: TpdoSample) {
        self.update(|t| {
            t.status_word = Some(sample.status_word);
            if let Some(position) = sample.position {
                t.position = Some(position);
            }
        });
    }

    fn update(&self, apply: impl FnOnce(&mut Telemetry)) {
        let mut generation = self.generation.lock();
        let mut next = **self.snapshot.load();
        apply(&mut next);
        *generation += 1;
        next.generation = *generation;
        next.updated_at = Some(Instant::now());
        self.snapshot.store(Arc::new(next));
        self.changed.notify_all();
    }

    /// 阻塞直到出现代数大于 `seen` 的快照或到达 `deadline`
    pub fn wait_newer(&self, seen: u64, deadline: Instant) -> Option<Telemetry> {
        let mut generation = self.generation.lock();
        while *generation <= seen {
            if self.changed.wait_until(&mut generation, deadline).timed_out() {
                break;
            }
        }
        if *generation > seen {
            Some(self.snapshot())
        } else {
            None
        }
    }

    /// 在节点上注册 TPDO1/TPDO2 监听，解码后写入本存储
    pub fn attach(self: &Arc<Self>, node: &dyn NodeClient, tpdo_cob_ids: [PdoCobId; 2]) {
        for (channel, cob_id) in TpdoChannel::ALL.into_iter().zip(tpdo_cob_ids) {
            let store = Arc::clone(self);
            let callback = move |frame: &CanopenFrame| {
                match TpdoSample::decode(channel, frame.data_slice()) {
                    Ok(sample) => {
                        trace!("TPDO{}: {:?}", channel.number(), sample);
                        store.record_sample(sample);
                    },
                    Err(e) => warn!("Malformed TPDO{}: {}", channel.number(), e),
                }
            };
            node.add_pdo_listener(cob_id.can_id() as u32, Box::new(callback));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_store_is_unknown() {
        let store = TelemetryStore::new();
        assert_eq!(store.state(), DriveState::Unknown);
        assert_eq!(store.snapshot().generation, 0);
    }

    #[test]
    fn test_last_write_wins() {
        let store = TelemetryStore::new();
        store.record_sample(TpdoSample {
            status_word: 0x0027,
            position: Some(100),
        });
        store.record_status(0x0021);
        store.record_sample(TpdoSample {
            status_word: 0x0427,
            position: None,
        });
        let snapshot = store.snapshot();
        assert_eq!(snapshot.status_word, Some(0x0427));
        assert_eq!(snapshot.position, Some(100));
        assert_eq!(snapshot.generation, 3);
        assert_eq!(snapshot.state(), DriveState::OperationEnabled);
    }

    #[test]
    fn test_wait_newer_wakes_on_update() {
        let store = Arc::new(TelemetryStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                store.record_position(42);
            })
        };
        let seen = store.wait_newer(0, Instant::now() + Duration::from_secs(2));
        writer.join().unwrap();
        assert_eq!(seen.and_then(|t| t.position), Some(42));
    }

    #[test]
    fn test_wait_newer_times_out() {
        let store = TelemetryStore::new();
        store.record_status(0x40);
        let start = Instant::now();
        assert!(store.wait_newer(1, start + Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
