use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use application::{BroadcastError, Broadcaster, OutboundEvent};
use domain::ConnectionId;

/// 活跃连接注册表。
///
/// 每个连接注册一个出站事件通道，Broadcaster 的两个方法
/// 在这张表上实现。同时它是对账的存活连接集合来源。
#[derive(Default)]
pub struct ConnectionRegistry {
    senders: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<OutboundEvent>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        connection: ConnectionId,
        sender: mpsc::UnboundedSender<OutboundEvent>,
    ) {
        self.senders.write().await.insert(connection, sender);
    }

    pub async fn unregister(&self, connection: ConnectionId) {
        self.senders.write().await.remove(&connection);
    }

    /// 当前存活的连接集合，对账的输入。
    pub async fn live_connection_ids(&self) -> HashSet<ConnectionId> {
        self.senders.read().await.keys().copied().collect()
    }
}

#[async_trait]
impl Broadcaster for ConnectionRegistry {
    async fn emit_to_all(&self, event: OutboundEvent) -> Result<(), BroadcastError> {
        let senders = self.senders.read().await;
        for (connection, sender) in senders.iter() {
            // 正在关闭的连接发送失败是正常的，交给断连清理
            if sender.send(event.clone()).is_err() {
                debug!(connection = %connection, "skipping closed connection during broadcast");
            }
        }
        Ok(())
    }

    async fn emit_to_connection(
        &self,
        connection: ConnectionId,
        event: OutboundEvent,
    ) -> Result<(), BroadcastError> {
        let senders = self.senders.read().await;
        let Some(sender) = senders.get(&connection) else {
            return Err(BroadcastError::failed(format!(
                "connection {connection} is not registered"
            )));
        };
        sender
            .send(event)
            .map_err(|err| BroadcastError::failed(err.to_string()))
    }
}
