//! # drive402 Driver
//!
//! 寄存器访问门面：只实现驱动协议需要的 CANopen 子集。
//!
//! - NMT 命令与 bootup 等待
//! - 加速 SDO 读写（按对象字典条目的数据类型编解码）
//! - RPDO 发送、按 COB-ID 分发的 TPDO 监听
//!
//! 上层（`drive402-client`）只依赖 [`NodeClient`] trait。

mod error;
pub mod node;

pub use error::DriverError;
pub use node::{CanopenNode, NodeClient, NodeConfig, PdoCallback};
