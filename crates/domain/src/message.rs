use serde::{Deserialize, Serialize};

use crate::value_objects::{Identity, MessageId, Timestamp};

/// 消息载荷类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Document,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Document => "document",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "video" => Some(MessageKind::Video),
            "document" => Some(MessageKind::Document),
            _ => None,
        }
    }
}

/// 消息投递状态，只允许单向推进：sent → delivered → read。
///
/// 派生的 Ord 给出状态机的顺序，任何状态更新前先比较大小，
/// 保证状态永不回退。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sent" => Some(MessageStatus::Sent),
            "delivered" => Some(MessageStatus::Delivered),
            "read" => Some(MessageStatus::Read),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一条消息及其投递状态。
///
/// delivered_at / read_at 一旦写入即不可变更。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: Identity,
    pub body: String,
    pub kind: MessageKind,
    pub status: MessageStatus,
    pub created_at: Timestamp,
    pub delivered_at: Option<Timestamp>,
    pub read_at: Option<Timestamp>,
}

impl Message {
    /// 构造一条新消息，初始状态为 sent。
    pub fn new_sent(
        id: MessageId,
        sender: Identity,
        body: impl Into<String>,
        kind: MessageKind,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            sender,
            body: body.into(),
            kind,
            status: MessageStatus::Sent,
            created_at,
            delivered_at: None,
            read_at: None,
        }
    }

    /// 推进到 delivered。已经是 delivered 或 read 时为幂等空操作。
    ///
    /// 返回状态是否发生了变化。
    pub fn mark_delivered(&mut self, at: Timestamp) -> bool {
        if self.status >= MessageStatus::Delivered {
            return false;
        }
        self.status = MessageStatus::Delivered;
        if self.delivered_at.is_none() {
            self.delivered_at = Some(at);
        }
        true
    }

    /// 推进到 read。允许从 sent 直接跳到 read，
    /// 此时补记 delivered_at：逻辑上 delivered 一定发生过。
    pub fn mark_read(&mut self, at: Timestamp) -> bool {
        if self.status >= MessageStatus::Read {
            return false;
        }
        if self.delivered_at.is_none() {
            self.delivered_at = Some(at);
        }
        self.status = MessageStatus::Read;
        if self.read_at.is_none() {
            self.read_at = Some(at);
        }
        true
    }
}
