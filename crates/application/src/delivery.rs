use std::sync::Arc;

use domain::{Identity, Message, MessageId, MessageKind, MessageStatus};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, OutboundEvent};
use crate::clock::Clock;
use crate::coordinator::CoreState;
use crate::error::ApplicationResult;
use crate::store::MessageStore;

/// 消息投递状态机。
///
/// 持久化走 MessageStore，在线与否以核心状态（身份锁）为准，
/// 状态变化通过 Broadcaster 通知出去。任何 await 之后都重新
/// 读取核心状态，不信任 await 之前捕获的值。
pub struct DeliveryCoordinator {
    state: Arc<Mutex<CoreState>>,
    store: Arc<dyn MessageStore>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
}

impl DeliveryCoordinator {
    pub fn new(
        state: Arc<Mutex<CoreState>>,
        store: Arc<dyn MessageStore>,
        broadcaster: Arc<dyn Broadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            store,
            broadcaster,
            clock,
        }
    }

    /// 广播失败不是核心状态错误，记录后继续。
    async fn emit_to_all(&self, event: OutboundEvent) {
        if let Err(err) = self.broadcaster.emit_to_all(event).await {
            warn!(error = %err, "broadcast to all failed");
        }
    }

    async fn emit_to_connection(&self, connection: domain::ConnectionId, event: OutboundEvent) {
        if let Err(err) = self.broadcaster.emit_to_connection(connection, event).await {
            warn!(connection = %connection, error = %err, "broadcast to connection failed");
        }
    }

    /// 发送一条消息。
    ///
    /// 先以 sent 状态持久化并广播 message-created；随后在同一
    /// 操作内重新检查对方是否在线，在线则立即升级为 delivered
    /// 并只通知发送方连接。这里的 delivered 表示"对方客户端
    /// 活着"，不保证对方界面已经渲染了这条消息。
    pub async fn send(
        &self,
        sender: Identity,
        body: impl Into<String>,
        kind: MessageKind,
    ) -> ApplicationResult<Message> {
        let created_at = self.clock.now();
        let message = Message::new_sent(MessageId::new(), sender, body, kind, created_at);
        self.store.insert(message.clone()).await?;

        self.emit_to_all(OutboundEvent::MessageCreated {
            message: message.clone(),
        })
        .await;

        // 持久化期间核心状态可能已经变了，重新取对方在线状态
        // 和发送方连接，而不是复用发送前的快照
        let (peer_online, sender_connection) = {
            let state = self.state.lock().await;
            (
                state.lock.is_held(sender.peer()),
                state.lock.holder_of(sender),
            )
        };

        if !peer_online {
            debug!(message_id = %message.id, "peer offline, message stays sent");
            return Ok(message);
        }

        let delivered_at = self.clock.now();
        let Some(updated) = self
            .store
            .update_status(message.id, MessageStatus::Delivered, delivered_at)
            .await?
        else {
            // 并发的 ack 先一步完成了升级，幂等让路
            return Ok(message);
        };

        if let Some(connection) = sender_connection {
            self.emit_to_connection(
                connection,
                OutboundEvent::MessageStatusChanged {
                    message_id: updated.id,
                    status: updated.status,
                    at: updated.delivered_at.unwrap_or(delivered_at),
                },
            )
            .await;
        }

        Ok(updated)
    }

    /// 接收方确认送达。幂等；发送方确认自己的消息会被丢弃。
    pub async fn acknowledge_delivered(
        &self,
        message_id: MessageId,
        acking: Identity,
    ) -> ApplicationResult<()> {
        let Some(message) = self.store.find_by_id(message_id).await? else {
            warn!(message_id = %message_id, "delivered-ack for unknown message, dropped");
            return Ok(());
        };
        if message.sender == acking {
            warn!(
                message_id = %message_id,
                identity = %acking,
                "sender cannot deliver-ack its own message, dropped"
            );
            return Ok(());
        }

        let at = self.clock.now();
        let Some(updated) = self
            .store
            .update_status(message_id, MessageStatus::Delivered, at)
            .await?
        else {
            return Ok(());
        };

        // 只有发送方需要知道送达回执
        let sender_connection = {
            let state = self.state.lock().await;
            state.lock.holder_of(updated.sender)
        };
        if let Some(connection) = sender_connection {
            self.emit_to_connection(
                connection,
                OutboundEvent::MessageStatusChanged {
                    message_id: updated.id,
                    status: updated.status,
                    at: updated.delivered_at.unwrap_or(at),
                },
            )
            .await;
        }
        Ok(())
    }

    /// 接收方确认已读。幂等；允许从 sent 直接到 read，
    /// 存储层会补记 delivered_at。
    pub async fn acknowledge_read(
        &self,
        message_id: MessageId,
        reader: Identity,
    ) -> ApplicationResult<()> {
        let Some(message) = self.store.find_by_id(message_id).await? else {
            warn!(message_id = %message_id, "read-ack for unknown message, dropped");
            return Ok(());
        };
        if message.sender == reader {
            warn!(
                message_id = %message_id,
                identity = %reader,
                "sender cannot read-ack its own message, dropped"
            );
            return Ok(());
        }

        let at = self.clock.now();
        let Some(updated) = self
            .store
            .update_status(message_id, MessageStatus::Read, at)
            .await?
        else {
            return Ok(());
        };

        // 已读状态发送方界面要用，广播给所有连接
        self.emit_to_all(OutboundEvent::MessageStatusChanged {
            message_id: updated.id,
            status: updated.status,
            at: updated.read_at.unwrap_or(at),
        })
        .await;
        Ok(())
    }

    /// 身份刚上线后的批量补投递。
    ///
    /// 把对方发出的、仍是 sent 的消息全部升级为 delivered，
    /// 并逐条通知对方连接。没有它，离线期间收到的消息永远
    /// 停在 sent。
    pub async fn flush_pending_on_online(&self, just_online: Identity) -> ApplicationResult<()> {
        let peer = just_online.peer();
        let pending = self.store.find_pending_from(peer).await?;
        if pending.is_empty() {
            return Ok(());
        }

        let at = self.clock.now();
        let ids: Vec<MessageId> = pending.iter().map(|m| m.id).collect();
        self.store
            .update_many_status(&ids, MessageStatus::Delivered, at)
            .await?;

        info!(
            identity = %just_online,
            count = ids.len(),
            "escalated pending messages to delivered"
        );

        let peer_connection = {
            let state = self.state.lock().await;
            state.lock.holder_of(peer)
        };
        if let Some(connection) = peer_connection {
            for id in ids {
                self.emit_to_connection(
                    connection,
                    OutboundEvent::MessageStatusChanged {
                        message_id: id,
                        status: MessageStatus::Delivered,
                        at,
                    },
                )
                .await;
            }
        }
        Ok(())
    }
}
