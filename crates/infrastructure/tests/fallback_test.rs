//! 降级存储测试：主存储故障后闩锁到内存存储，不再回切。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use application::{MemoryMessageStore, MessageStore};
use async_trait::async_trait;
use domain::{
    Identity, Message, MessageId, MessageKind, MessageStatus, RepositoryError, Timestamp,
};
use infrastructure::FallbackMessageStore;
use time::OffsetDateTime;

/// 永远失败的主存储，记录被调用的次数。
#[derive(Default)]
struct FailingStore {
    calls: AtomicU32,
}

impl FailingStore {
    fn fail<T>(&self) -> Result<T, RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RepositoryError::storage("connection refused"))
    }
}

#[async_trait]
impl MessageStore for FailingStore {
    async fn find_all(&self) -> Result<Vec<Message>, RepositoryError> {
        self.fail()
    }
    async fn insert(&self, _message: Message) -> Result<(), RepositoryError> {
        self.fail()
    }
    async fn find_by_id(&self, _id: MessageId) -> Result<Option<Message>, RepositoryError> {
        self.fail()
    }
    async fn update_status(
        &self,
        _id: MessageId,
        _to: MessageStatus,
        _at: Timestamp,
    ) -> Result<Option<Message>, RepositoryError> {
        self.fail()
    }
    async fn update_many_status(
        &self,
        _ids: &[MessageId],
        _to: MessageStatus,
        _at: Timestamp,
    ) -> Result<(), RepositoryError> {
        self.fail()
    }
    async fn find_pending_from(&self, _sender: Identity) -> Result<Vec<Message>, RepositoryError> {
        self.fail()
    }
}

fn sample_message() -> Message {
    Message::new_sent(
        MessageId::new(),
        Identity::A,
        "hello",
        MessageKind::Text,
        OffsetDateTime::now_utc(),
    )
}

#[tokio::test]
async fn storage_error_degrades_to_fallback_without_losing_the_write() {
    let primary = Arc::new(FailingStore::default());
    let store = FallbackMessageStore::new(primary.clone(), Arc::new(MemoryMessageStore::new()));

    let message = sample_message();
    // 首次写入：主存储失败，降级后写进内存存储
    store.insert(message.clone()).await.unwrap();
    assert!(store.is_degraded());

    let found = store.find_by_id(message.id).await.unwrap();
    assert_eq!(found.map(|m| m.id), Some(message.id));
}

#[tokio::test]
async fn degradation_latches_and_primary_is_not_retried() {
    let primary = Arc::new(FailingStore::default());
    let store = FallbackMessageStore::new(primary.clone(), Arc::new(MemoryMessageStore::new()));

    store.insert(sample_message()).await.unwrap();
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);

    // 之后的操作全部走内存存储，主存储不再被碰
    store.insert(sample_message()).await.unwrap();
    store.find_all().await.unwrap();
    store.find_pending_from(Identity::A).await.unwrap();
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn not_found_does_not_trigger_degradation() {
    // 健康的主存储返回 NotFound 是语义结果，不是故障
    let primary = Arc::new(MemoryMessageStore::new());
    let store = FallbackMessageStore::new(primary, Arc::new(MemoryMessageStore::new()));

    let result = store
        .update_status(
            MessageId::new(),
            MessageStatus::Delivered,
            OffsetDateTime::now_utc(),
        )
        .await;
    assert!(matches!(result, Err(RepositoryError::NotFound)));
    assert!(!store.is_degraded());
}

#[tokio::test]
async fn degraded_store_preserves_status_monotonicity() {
    let primary = Arc::new(FailingStore::default());
    let store = FallbackMessageStore::new(primary, Arc::new(MemoryMessageStore::new()));

    let message = sample_message();
    store.insert(message.clone()).await.unwrap();

    let now = OffsetDateTime::now_utc();
    store
        .update_status(message.id, MessageStatus::Read, now)
        .await
        .unwrap();
    // read 之后的 delivered 在降级模式下同样是空操作
    let noop = store
        .update_status(message.id, MessageStatus::Delivered, now)
        .await
        .unwrap();
    assert!(noop.is_none());
}
