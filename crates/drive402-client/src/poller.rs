//! 完成轮询
//!
//! [`wait_until`] 反复获取状态字观测，直到谓词成立或截止时间到达。
//! 观测来源可替换：
//!
//! - [`ActivePolling`]：按固定间隔 SDO 读取状态字
//! - [`TelemetryWatch`]：阻塞等待遥测存储中出现新的 TPDO 观测
//!
//! 超时是一种结果而不是错误；单次读取失败只记录日志，继续重试直到截止。

use crate::{DriveError, TelemetryStore};
use drive402_driver::NodeClient;
use drive402_protocol::{ACTUAL_POSITION, OdEntry, STATUS_WORD, StatusWord};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 单次等待的时限上限，更长的超时按此截断
pub const MAX_WAIT: Duration = Duration::from_secs(7 * 24 * 3600);

/// 一次状态字观测
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub status_word: u16,
    /// 观测中附带的位置（TPDO2）
    pub position: Option<i32>,
}

/// 状态字观测来源
pub trait StatusSource {
    /// 取下一次观测，最迟在 `deadline` 返回
    ///
    /// `Ok(None)` 表示截止前没有新观测。
    fn observe(&mut self, deadline: Instant) -> Result<Option<Observation>, DriveError>;

    /// 条件满足后读取最终位置
    fn position(&mut self) -> Result<Option<i32>, DriveError>;
}

/// 等待结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached {
        status_word: u16,
        position: Option<i32>,
        elapsed: Duration,
    },
    TimedOut {
        last_status: Option<u16>,
        last_position: Option<i32>,
        timeout: Duration,
    },
}

impl WaitOutcome {
    pub fn is_reached(&self) -> bool {
        matches!(self, WaitOutcome::Reached { .. })
    }

    pub fn position(&self) -> Option<i32> {
        match *self {
            WaitOutcome::Reached { position, .. } => position,
            WaitOutcome::TimedOut { last_position, .. } => last_position,
        }
    }
}

/// 默认谓词：目标到达（bit10）
pub fn target_reached(status_word: u16) -> bool {
    StatusWord::from_raw(status_word).target_reached()
}

/// 回零完成谓词：bit10 与 bit12 同时置位
pub fn homing_complete(status_word: u16) -> bool {
    StatusWord::from_raw(status_word).homing_complete()
}

/// 阻塞直到 `predicate(status_word)` 成立或超时
///
/// # 参数
/// - `source`: 观测来源
/// - `predicate`: 状态字条件
/// - `timeout`: 从调用开始计算的时限，超过 [`MAX_WAIT`] 时截断
pub fn wait_until<S>(source: &mut S, predicate: impl Fn(u16) -> bool, timeout: Duration) -> WaitOutcome
where
    S: StatusSource + ?Sized,
{
    let start = Instant::now();
    let timeout = if timeout > MAX_WAIT {
        warn!("Timeout {:?} exceeds {:?}, clamping", timeout, MAX_WAIT);
        MAX_WAIT
    } else {
        timeout
    };
    let deadline = start + timeout;
    let mut last_status = None;
    let mut last_position = None;

    loop {
        match source.observe(deadline) {
            Ok(Some(observation)) => {
                last_status = Some(observation.status_word);
                if observation.position.is_some() {
                    last_position = observation.position;
                }
                if predicate(observation.status_word) {
                    let position = match source.position() {
                        Ok(position) => position.or(last_position),
                        Err(e) => {
                            warn!("Failed to read final position: {}", e);
                            last_position
                        },
                    };
                    debug!(
                        "Condition met after {:?}: status word 0x{:04X}",
                        start.elapsed(),
                        observation.status_word
                    );
                    return WaitOutcome::Reached {
                        status_word: observation.status_word,
                        position,
                        elapsed: start.elapsed(),
                    };
                }
            },
            Ok(None) => {},
            Err(e) => warn!("Status observation failed, retrying: {}", e),
        }

        if Instant::now() >= deadline {
            debug!("Wait timed out after {:?}", timeout);
            return WaitOutcome::TimedOut {
                last_status,
                last_position,
                timeout,
            };
        }
    }
}

/// SDO 主动轮询
pub struct ActivePolling<'a> {
    node: &'a dyn NodeClient,
    telemetry: Option<&'a TelemetryStore>,
    interval: Duration,
    first: bool,
}

impl<'a> ActivePolling<'a> {
    pub fn new(node: &'a dyn NodeClient, interval: Duration) -> Self {
        Self {
            node,
            telemetry: None,
            interval,
            first: true,
        }
    }

    /// 将读取结果同步写入遥测存储
    pub fn recording_into(mut self, telemetry: &'a TelemetryStore) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    fn read(&self, entry: &OdEntry) -> Result<i64, DriveError> {
        self.node
            .sdo_read(entry)
            .map_err(|e| DriveError::from_access(e, entry, None))
    }
}

impl StatusSource for ActivePolling<'_> {
    fn observe(&mut self, deadline: Instant) -> Result<Option<Observation>, DriveError> {
        if !self.first {
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(self.interval.min(remaining));
        }
        self.first = false;

        let status_word = self.read(&STATUS_WORD)? as u16;
        if let Some(telemetry) = self.telemetry {
            telemetry.record_status(status_word);
        }
        Ok(Some(Observation {
            status_word,
            position: None,
        }))
    }

    fn position(&mut self) -> Result<Option<i32>, DriveError> {
        let position = self.read(&ACTUAL_POSITION)? as i32;
        if let Some(telemetry) = self.telemetry {
            telemetry.record_position(position);
        }
        Ok(Some(position))
    }
}

/// 被动等待 TPDO 遥测
pub struct TelemetryWatch<'a> {
    store: &'a TelemetryStore,
    seen: u64,
}

impl<'a> TelemetryWatch<'a> {
    /// 只接受代数大于 `since` 的快照
    pub fn new(store: &'a TelemetryStore, since: u64) -> Self {
        Self { store, seen: since }
    }
}

impl StatusSource for TelemetryWatch<'_> {
    fn observe(&mut self, deadline: Instant) -> Result<Option<Observation>, DriveError> {
        let current = self.store.snapshot();
        let snapshot = if current.generation > self.seen {
            Some(current)
        } else {
            self.store.wait_newer(self.seen, deadline)
        };

        Ok(snapshot.and_then(|t| {
            self.seen = t.generation;
            t.status_word.map(|status_word| Observation {
                status_word,
                position: t.position,
            })
        }))
    }

    fn position(&mut self) -> Result<Option<i32>, DriveError> {
        Ok(self.store.snapshot().position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// 按时间脚本返回状态字：`(出现时刻, 状态字)`
    struct ScriptedSource {
        start: Instant,
        interval: Duration,
        script: VecDeque<(Duration, u16)>,
        current: u16,
        first: bool,
        observations: usize,
    }

    impl ScriptedSource {
        fn new(interval: Duration, script: &[(Duration, u16)]) -> Self {
            Self {
                start: Instant::now(),
                interval,
                script: script.iter().copied().collect(),
                current: 0x0027,
                first: true,
                observations: 0,
            }
        }
    }

    impl StatusSource for ScriptedSource {
        fn observe(&mut self, deadline: Instant) -> Result<Option<Observation>, DriveError> {
            if !self.first {
                let remaining = deadline.saturating_duration_since(Instant::now());
                std::thread::sleep(self.interval.min(remaining));
            }
            self.first = false;
            let now = self.start.elapsed();
            while let Some(&(at, status)) = self.script.front() {
                if at > now {
                    break;
                }
                self.current = status;
                self.script.pop_front();
            }
            self.observations += 1;
            Ok(Some(Observation {
                status_word: self.current,
                position: Some(self.observations as i32),
            }))
        }

        fn position(&mut self) -> Result<Option<i32>, DriveError> {
            Ok(Some(50_000))
        }
    }

    #[test]
    fn test_reached_on_first_matching_observation() {
        let mut source = ScriptedSource::new(
            Duration::from_millis(10),
            &[(Duration::from_millis(300), 0x0427)],
        );
        let outcome = wait_until(&mut source, target_reached, Duration::from_secs(10));
        match outcome {
            WaitOutcome::Reached {
                status_word,
                position,
                elapsed,
            } => {
                assert_eq!(status_word, 0x0427);
                assert_eq!(position, Some(50_000));
                assert!(elapsed >= Duration::from_millis(300));
                assert!(elapsed < Duration::from_millis(300) + Duration::from_millis(200));
            },
            other => panic!("Expected Reached, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_within_one_interval() {
        let interval = Duration::from_millis(50);
        let timeout = Duration::from_millis(400);
        let mut source = ScriptedSource::new(interval, &[]);
        let start = Instant::now();
        let outcome = wait_until(&mut source, target_reached, timeout);
        let elapsed = start.elapsed();

        assert!(!outcome.is_reached());
        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + interval + Duration::from_millis(50));
        match outcome {
            WaitOutcome::TimedOut {
                last_status,
                last_position,
                ..
            } => {
                assert_eq!(last_status, Some(0x0027));
                assert!(last_position.is_some());
            },
            other => panic!("Expected TimedOut, got {:?}", other),
        }
    }

    #[test]
    fn test_read_failures_are_retried() {
        struct Flaky {
            calls: usize,
        }
        impl StatusSource for Flaky {
            fn observe(&mut self, _deadline: Instant) -> Result<Option<Observation>, DriveError> {
                self.calls += 1;
                if self.calls < 3 {
                    Err(crate::Precondition::NotConnected.into())
                } else {
                    Ok(Some(Observation {
                        status_word: 0x1427,
                        position: None,
                    }))
                }
            }

            fn position(&mut self) -> Result<Option<i32>, DriveError> {
                Ok(None)
            }
        }

        let mut source = Flaky { calls: 0 };
        let outcome = wait_until(&mut source, homing_complete, Duration::from_secs(1));
        assert!(outcome.is_reached());
        assert_eq!(source.calls, 3);
    }

    #[test]
    fn test_huge_timeout_is_clamped() {
        struct Deadlines {
            seen: Vec<Instant>,
        }
        impl StatusSource for Deadlines {
            fn observe(&mut self, deadline: Instant) -> Result<Option<Observation>, DriveError> {
                self.seen.push(deadline);
                Ok((self.seen.len() == 2).then_some(Observation {
                    status_word: 0x0427,
                    position: None,
                }))
            }

            fn position(&mut self) -> Result<Option<i32>, DriveError> {
                Ok(None)
            }
        }

        let mut source = Deadlines { seen: Vec::new() };
        let before = Instant::now();
        let timeout = Duration::try_from_secs_f64(1e19).unwrap();
        let outcome = wait_until(&mut source, target_reached, timeout);

        assert!(outcome.is_reached());
        assert_eq!(source.seen.len(), 2);
        assert!(source.seen[0] <= Instant::now() + MAX_WAIT);
        assert!(source.seen[0] >= before + MAX_WAIT);

        let mut source = Deadlines { seen: Vec::new() };
        assert!(wait_until(&mut source, target_reached, Duration::MAX).is_reached());
    }

    #[test]
    fn test_telemetry_watch_sees_broadcast() {
        let store = std::sync::Arc::new(TelemetryStore::new());
        store.record_status(0x0027);
        let since = store.snapshot().generation;

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                store.record_sample(drive402_protocol::TpdoSample {
                    status_word: 0x0427,
                    position: Some(1234),
                });
            })
        };
        let mut watch = TelemetryWatch::new(&store, since);
        let outcome = wait_until(&mut watch, target_reached, Duration::from_secs(2));
        writer.join().unwrap();
        assert_eq!(outcome.position(), Some(1234));
        assert!(outcome.is_reached());
    }
}
