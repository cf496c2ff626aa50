use std::collections::HashMap;

use async_trait::async_trait;
use domain::{ConnectionId, Identity, Message, MessageId, MessageStatus, PresenceRecord, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 发给客户端的在线状态视图，不暴露持有者连接ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceView {
    pub is_online: bool,
    pub last_seen: Timestamp,
}

impl From<PresenceRecord> for PresenceView {
    fn from(record: PresenceRecord) -> Self {
        Self {
            is_online: record.is_online,
            last_seen: record.last_seen,
        }
    }
}

/// 核心向外发出的全部事件。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// 当前被占用的身份列表
    #[serde(rename = "identity-availability-changed")]
    IdentityAvailability { held: Vec<Identity> },
    /// 全量在线状态快照
    PresenceChanged {
        presence: HashMap<Identity, PresenceView>,
    },
    /// 新消息已持久化
    MessageCreated { message: Message },
    /// 消息状态推进
    MessageStatusChanged {
        message_id: MessageId,
        status: MessageStatus,
        at: Timestamp,
    },
    /// 身份认领结果，只发给发起认领的连接
    ClaimResult { granted: bool },
    /// 历史消息回放
    History { messages: Vec<Message> },
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// 事件广播协作方，由传输层实现，核心只调用。
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// 广播给全部活跃连接
    async fn emit_to_all(&self, event: OutboundEvent) -> Result<(), BroadcastError>;

    /// 只发给指定连接
    async fn emit_to_connection(
        &self,
        connection: ConnectionId,
        event: OutboundEvent,
    ) -> Result<(), BroadcastError>;
}
