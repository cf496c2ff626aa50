use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, warn};

use application::MessageStore;
use domain::{Identity, Message, MessageId, MessageStatus, RepositoryError, Timestamp};

/// 带内存降级的消息存储。
///
/// 主存储（数据库）出现存储级错误时记录告警并闩锁降级，
/// 本会话余下的读写全部走内存存储。降级是单向的：不回切，
/// 避免两份存储之间的状态脑裂破坏状态单调性。降级模式下
/// 消息不跨进程重启存活，这是明确接受的弱保证。
///
/// NotFound 是语义结果而不是故障，不触发降级。
pub struct FallbackMessageStore {
    primary: Arc<dyn MessageStore>,
    fallback: Arc<dyn MessageStore>,
    degraded: AtomicBool,
}

impl FallbackMessageStore {
    pub fn new(primary: Arc<dyn MessageStore>, fallback: Arc<dyn MessageStore>) -> Self {
        Self {
            primary,
            fallback,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn active(&self) -> &Arc<dyn MessageStore> {
        if self.is_degraded() {
            &self.fallback
        } else {
            &self.primary
        }
    }

    /// 判断主存储的结果是否应当触发降级。
    fn latch_on_storage_error<T>(&self, result: &Result<T, RepositoryError>) -> bool {
        match result {
            Err(RepositoryError::Storage(message)) => {
                error!(
                    error = %message,
                    "primary message store failed, degrading to in-memory store for this session"
                );
                self.degraded.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl MessageStore for FallbackMessageStore {
    async fn find_all(&self) -> Result<Vec<Message>, RepositoryError> {
        let result = self.active().find_all().await;
        if self.latch_on_storage_error(&result) {
            warn!("serving history from in-memory fallback");
            return self.fallback.find_all().await;
        }
        result
    }

    async fn insert(&self, message: Message) -> Result<(), RepositoryError> {
        let result = self.active().insert(message.clone()).await;
        if self.latch_on_storage_error(&result) {
            return self.fallback.insert(message).await;
        }
        result
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let result = self.active().find_by_id(id).await;
        if self.latch_on_storage_error(&result) {
            return self.fallback.find_by_id(id).await;
        }
        result
    }

    async fn update_status(
        &self,
        id: MessageId,
        to: MessageStatus,
        at: Timestamp,
    ) -> Result<Option<Message>, RepositoryError> {
        let result = self.active().update_status(id, to, at).await;
        if self.latch_on_storage_error(&result) {
            return self.fallback.update_status(id, to, at).await;
        }
        result
    }

    async fn update_many_status(
        &self,
        ids: &[MessageId],
        to: MessageStatus,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let result = self.active().update_many_status(ids, to, at).await;
        if self.latch_on_storage_error(&result) {
            return self.fallback.update_many_status(ids, to, at).await;
        }
        result
    }

    async fn find_pending_from(&self, sender: Identity) -> Result<Vec<Message>, RepositoryError> {
        let result = self.active().find_pending_from(sender).await;
        if self.latch_on_storage_error(&result) {
            return self.fallback.find_pending_from(sender).await;
        }
        result
    }
}
