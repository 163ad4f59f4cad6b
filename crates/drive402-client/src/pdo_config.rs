//! PDO 通道配置
//!
//! CANopen 只允许在 PDO 无效（COB-ID bit31 置位）时修改通信参数，
//! 因此配置分四步，顺序固定：
//!
//! 1. 置位 RPDO1..3、TPDO1..2 COB-ID 的 bit31
//! 2. TPDO 传输类型设为 254（事件驱动）
//! 3. 清除 bit31，先 RPDO 后 TPDO
//! 4. 读回全部 COB-ID，刷新本地镜像

use crate::DriveError;
use drive402_driver::NodeClient;
use drive402_protocol::{
    OdEntry, PdoCobId, RpdoChannel, TRANSMISSION_TYPE_EVENT_DRIVEN, TpdoChannel,
};
use tracing::{debug, info};

/// 从设备读回的通道 COB-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoChannelMap {
    pub rpdo: [PdoCobId; 3],
    pub tpdo: [PdoCobId; 2],
}

impl PdoChannelMap {
    /// 预定义连接集的默认值
    pub fn defaults(node_id: u8) -> Self {
        Self {
            rpdo: RpdoChannel::ALL.map(|c| c.default_cob_id(node_id)),
            tpdo: TpdoChannel::ALL.map(|c| c.default_cob_id(node_id)),
        }
    }
}

fn cob_id_entries() -> impl Iterator<Item = OdEntry> {
    let rpdo = RpdoChannel::ALL
        .into_iter()
        .map(|c| OdEntry::rpdo_cob_id(c.number()));
    let tpdo = TpdoChannel::ALL
        .into_iter()
        .map(|c| OdEntry::tpdo_cob_id(c.number()));
    rpdo.chain(tpdo)
}

fn read_cob_id(node: &dyn NodeClient, entry: &OdEntry) -> Result<PdoCobId, DriveError> {
    let raw = node
        .sdo_read(entry)
        .map_err(|e| DriveError::from_access(e, entry, None))?;
    Ok(PdoCobId(raw as u32))
}

fn write(node: &dyn NodeClient, entry: &OdEntry, value: i64) -> Result<(), DriveError> {
    node.sdo_write(entry, value)
        .map_err(|e| DriveError::from_access(e, entry, Some(value)))
}

/// 配置 RPDO1..3 / TPDO1..2 的通信参数
///
/// # 错误
/// - `DriveError::DeviceRejected`: 设备拒绝某一步写入（配置中止，不回滚）
/// - `DriveError::Transport`: SDO 超时等链路错误
pub fn configure_channels(node: &dyn NodeClient) -> Result<PdoChannelMap, DriveError> {
    debug!("Disabling PDO channels for configuration");
    for entry in cob_id_entries() {
        let cob_id = read_cob_id(node, &entry)?;
        write(node, &entry, cob_id.disabled().0 as i64)?;
    }

    for channel in TpdoChannel::ALL {
        write(
            node,
            &OdEntry::tpdo_transmission_type(channel.number()),
            TRANSMISSION_TYPE_EVENT_DRIVEN as i64,
        )?;
    }

    for entry in cob_id_entries() {
        let cob_id = read_cob_id(node, &entry)?;
        write(node, &entry, cob_id.enabled().0 as i64)?;
    }

    let mut map = PdoChannelMap::defaults(node.node_id());
    for (slot, channel) in map.rpdo.iter_mut().zip(RpdoChannel::ALL) {
        *slot = read_cob_id(node, &OdEntry::rpdo_cob_id(channel.number()))?;
    }
    for (slot, channel) in map.tpdo.iter_mut().zip(TpdoChannel::ALL) {
        *slot = read_cob_id(node, &OdEntry::tpdo_cob_id(channel.number()))?;
    }

    info!(
        "PDO channels configured: RPDO {:03X?}, TPDO {:03X?}",
        map.rpdo.map(|c| c.can_id()),
        map.tpdo.map(|c| c.can_id())
    );
    Ok(map)
}
