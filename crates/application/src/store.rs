use async_trait::async_trait;
use domain::{Identity, Message, MessageId, MessageStatus, RepositoryError, Timestamp};

/// 消息持久化协作方。
///
/// 核心不在本地缓存消息状态，状态推进全部走这里。
/// `update_status` / `update_many_status` 只允许前进
/// （sent → delivered → read），回退写入是空操作，这让
/// 并发确认天然幂等，先到者生效。
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 按创建顺序返回全部消息，用于连接建立时的历史回放。
    async fn find_all(&self) -> Result<Vec<Message>, RepositoryError>;

    /// 持久化一条新消息。
    async fn insert(&self, message: Message) -> Result<(), RepositoryError>;

    /// 按ID查找消息。
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    /// 把消息状态向前推进到 `to`。
    ///
    /// 前进了返回更新后的消息；目标状态不高于当前状态时返回
    /// None（幂等空操作）；消息不存在返回 NotFound。
    /// 时间戳只在首次写入时生效，sent 直接到 read 时补记
    /// delivered_at。
    async fn update_status(
        &self,
        id: MessageId,
        to: MessageStatus,
        at: Timestamp,
    ) -> Result<Option<Message>, RepositoryError>;

    /// 批量推进状态，语义与 `update_status` 相同。
    async fn update_many_status(
        &self,
        ids: &[MessageId],
        to: MessageStatus,
        at: Timestamp,
    ) -> Result<(), RepositoryError>;

    /// 指定身份发出的、仍停留在 sent 状态的消息。
    ///
    /// 对方重新上线时的批量补投递查询，存储实现需要
    /// (status, sender) 上的索引支撑它。
    async fn find_pending_from(&self, sender: Identity) -> Result<Vec<Message>, RepositoryError>;
}

/// 内存实现的消息存储。
///
/// 测试里直接用，生产环境作为数据库不可用时的降级路径
/// （消息在进程重启后丢失，这是降级模式明确接受的弱保证）。
pub mod memory {
    use super::*;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct MemoryMessageStore {
        // Vec 保持创建顺序，双人会话的消息量撑不满一个扫描
        messages: RwLock<Vec<Message>>,
    }

    impl MemoryMessageStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn advance(message: &mut Message, to: MessageStatus, at: Timestamp) -> bool {
        match to {
            MessageStatus::Sent => false,
            MessageStatus::Delivered => message.mark_delivered(at),
            MessageStatus::Read => message.mark_read(at),
        }
    }

    #[async_trait]
    impl MessageStore for MemoryMessageStore {
        async fn find_all(&self) -> Result<Vec<Message>, RepositoryError> {
            Ok(self.messages.read().await.clone())
        }

        async fn insert(&self, message: Message) -> Result<(), RepositoryError> {
            self.messages.write().await.push(message);
            Ok(())
        }

        async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
            let messages = self.messages.read().await;
            Ok(messages.iter().find(|m| m.id == id).cloned())
        }

        async fn update_status(
            &self,
            id: MessageId,
            to: MessageStatus,
            at: Timestamp,
        ) -> Result<Option<Message>, RepositoryError> {
            let mut messages = self.messages.write().await;
            let message = messages
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or(RepositoryError::NotFound)?;
            if advance(message, to, at) {
                Ok(Some(message.clone()))
            } else {
                Ok(None)
            }
        }

        async fn update_many_status(
            &self,
            ids: &[MessageId],
            to: MessageStatus,
            at: Timestamp,
        ) -> Result<(), RepositoryError> {
            let mut messages = self.messages.write().await;
            for message in messages.iter_mut() {
                if ids.contains(&message.id) {
                    advance(message, to, at);
                }
            }
            Ok(())
        }

        async fn find_pending_from(
            &self,
            sender: Identity,
        ) -> Result<Vec<Message>, RepositoryError> {
            let messages = self.messages.read().await;
            Ok(messages
                .iter()
                .filter(|m| m.sender == sender && m.status == MessageStatus::Sent)
                .cloned()
                .collect())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use domain::MessageKind;
        use time::OffsetDateTime;

        fn message(sender: Identity) -> Message {
            Message::new_sent(
                MessageId::new(),
                sender,
                "hello",
                MessageKind::Text,
                OffsetDateTime::now_utc(),
            )
        }

        #[tokio::test]
        async fn update_status_is_monotonic() {
            let store = MemoryMessageStore::new();
            let msg = message(Identity::A);
            let id = msg.id;
            store.insert(msg).await.unwrap();

            let now = OffsetDateTime::now_utc();
            let updated = store
                .update_status(id, MessageStatus::Read, now)
                .await
                .unwrap()
                .expect("first read advances");
            assert_eq!(updated.status, MessageStatus::Read);
            assert_eq!(updated.delivered_at, Some(now));

            // read 之后到达的 delivered 确认是空操作
            let noop = store
                .update_status(id, MessageStatus::Delivered, now)
                .await
                .unwrap();
            assert!(noop.is_none());
            let stored = store.find_by_id(id).await.unwrap().unwrap();
            assert_eq!(stored.status, MessageStatus::Read);
        }

        #[tokio::test]
        async fn update_status_missing_message_is_not_found() {
            let store = MemoryMessageStore::new();
            let result = store
                .update_status(MessageId::new(), MessageStatus::Delivered, OffsetDateTime::now_utc())
                .await;
            assert!(matches!(result, Err(RepositoryError::NotFound)));
        }

        #[tokio::test]
        async fn find_pending_filters_by_sender_and_status() {
            let store = MemoryMessageStore::new();
            let from_a = message(Identity::A);
            let mut delivered = message(Identity::A);
            delivered.mark_delivered(OffsetDateTime::now_utc());
            let from_b = message(Identity::B);

            store.insert(from_a.clone()).await.unwrap();
            store.insert(delivered).await.unwrap();
            store.insert(from_b).await.unwrap();

            let pending = store.find_pending_from(Identity::A).await.unwrap();
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].id, from_a.id);
        }
    }
}
