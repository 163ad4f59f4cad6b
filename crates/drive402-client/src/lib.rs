//! # drive402 Client
//!
//! CiA 402 驱动器会话：使能/去使能、回零、轮廓位置运动与完成等待。
//!
//! ## 分层
//!
//! ```text
//! Drive (会话, 前置条件, 命令序列)
//!   ├── CommandTransport (SDO / PDO 写入路径)
//!   ├── poller (ActivePolling / TelemetryWatch)
//!   └── TelemetryStore (TPDO 回调 + SDO 读取)
//! NodeClient (drive402-driver)
//! ```
//!
//! ## 示例
//!
//! ```rust,no_run
//! # #[cfg(target_os = "linux")]
//! # fn main() -> Result<(), drive402_client::DriveError> {
//! use drive402_client::{Drive, DriveConfig};
//! use std::time::Duration;
//!
//! let mut drive = Drive::open(DriveConfig::default())?;
//! drive.enable()?;
//! drive.home()?;
//! drive.move_to(50_000)?;
//! let outcome = drive.wait(Duration::from_secs(10))?;
//! println!("reached: {}", outcome.is_reached());
//! drive.disconnect();
//! # Ok(())
//! # }
//! # #[cfg(not(target_os = "linux"))]
//! # fn main() {}
//! ```

pub mod config;
pub mod drive;
mod error;
pub mod pdo_config;
pub mod poller;
pub mod telemetry;
pub mod transport;

pub use config::{ConnectionConfig, DriveConfig, HomingConfig, PollConfig, Settle, SettleDelays};
pub use drive::{Drive, DriveStatus, HomingReport, MotionParameters};
pub use error::{DriveError, Precondition};
pub use pdo_config::PdoChannelMap;
pub use poller::{MAX_WAIT, Observation, StatusSource, WaitOutcome};
pub use telemetry::{Telemetry, TelemetryStore};
pub use transport::{CommandFrame, CommandTransport, TransportMode};

pub use drive402_protocol::{DriveState, OperationMode};
