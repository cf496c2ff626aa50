use serde::{Deserialize, Serialize};

use crate::value_objects::{ConnectionId, Timestamp};

/// 单个身份的在线状态记录。
///
/// last_seen 只在 is_online 由 true 变为 false 的那一刻更新，
/// 并且永远不会向过去移动。在线状态下 last_seen 表示上一次
/// 离线的时间，展示层不应把它当作"最后活跃时间"。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub is_online: bool,
    pub last_seen: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<ConnectionId>,
}

impl PresenceRecord {
    /// 初始记录：离线，last_seen 取进程启动时刻。
    pub fn offline_since(at: Timestamp) -> Self {
        Self {
            is_online: false,
            last_seen: at,
            holder: None,
        }
    }
}
