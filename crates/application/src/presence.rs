use std::collections::{HashMap, HashSet};

use domain::{ConnectionId, Identity, PresenceRecord, Timestamp};

/// 在线状态追踪器。
///
/// 以身份锁的认领/释放为主要输入来源，周期性对账兜底：
/// 传输层的断连通知不保证送达，对账遍历所有持有者，把不在
/// 存活连接集合里的身份强制置为离线，保证状态最多滞后一个
/// 对账周期。
#[derive(Debug)]
pub struct PresenceTracker {
    records: HashMap<Identity, PresenceRecord>,
}

impl PresenceTracker {
    /// 两个身份初始均为离线，last_seen 取构造时刻。
    pub fn new(at: Timestamp) -> Self {
        let records = Identity::ALL
            .into_iter()
            .map(|identity| (identity, PresenceRecord::offline_since(at)))
            .collect();
        Self { records }
    }

    /// 身份认领成功后调用。
    ///
    /// 不触碰 last_seen：在线状态下"多久之前在线"没有意义，
    /// 这是展示层的事，不在这里存一个谎。
    /// 返回记录是否有实际变化，调用方据此决定是否广播。
    pub fn mark_online(&mut self, identity: Identity, connection: ConnectionId) -> bool {
        let record = self
            .records
            .get_mut(&identity)
            .expect("all identities are pre-seeded");
        if record.is_online && record.holder == Some(connection) {
            return false;
        }
        record.is_online = true;
        record.holder = Some(connection);
        true
    }

    /// 断连或对账时调用，记录离线时刻。
    ///
    /// last_seen 只向前移动，重复置离线不会回拨时间。
    pub fn mark_offline(&mut self, identity: Identity, now: Timestamp) -> bool {
        let record = self
            .records
            .get_mut(&identity)
            .expect("all identities are pre-seeded");
        if !record.is_online && record.holder.is_none() {
            return false;
        }
        record.is_online = false;
        record.holder = None;
        if now > record.last_seen {
            record.last_seen = now;
        }
        true
    }

    /// 纯读快照，用于构造 presence-changed 事件。
    pub fn snapshot(&self) -> HashMap<Identity, PresenceRecord> {
        self.records.clone()
    }

    /// 对账：持有者不在存活连接集合里的身份全部置为离线。
    ///
    /// 返回本轮被置离线的身份，调用方还需要同步释放身份锁。
    pub fn reconcile(
        &mut self,
        live_connections: &HashSet<ConnectionId>,
        now: Timestamp,
    ) -> Vec<Identity> {
        let stale: Vec<Identity> = self
            .records
            .iter()
            .filter_map(|(identity, record)| match record.holder {
                Some(holder) if !live_connections.contains(&holder) => Some(*identity),
                _ => None,
            })
            .collect();

        for identity in &stale {
            self.mark_offline(*identity, now);
        }
        stale
    }
}
