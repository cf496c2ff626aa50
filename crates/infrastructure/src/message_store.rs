use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use application::MessageStore;
use domain::{
    Identity, Message, MessageId, MessageKind, MessageStatus, RepositoryError, Timestamp,
};

pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    sender: String,
    body: String,
    kind: String,
    status: String,
    created_at: OffsetDateTime,
    delivered_at: Option<OffsetDateTime>,
    read_at: Option<OffsetDateTime>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let sender = Identity::parse(&value.sender)
            .map_err(|err| invalid_data(err.to_string()))?;
        let kind = MessageKind::parse(&value.kind)
            .ok_or_else(|| invalid_data(format!("unknown message kind: {}", value.kind)))?;
        let status = MessageStatus::parse(&value.status)
            .ok_or_else(|| invalid_data(format!("unknown message status: {}", value.status)))?;

        Ok(Message {
            id: MessageId::from(value.id),
            sender,
            body: value.body,
            kind,
            status,
            created_at: value.created_at,
            delivered_at: value.delivered_at,
            read_at: value.read_at,
        })
    }
}

const SELECT_COLUMNS: &str =
    "id, sender, body, kind, status, created_at, delivered_at, read_at";

/// PostgreSQL 消息存储。
///
/// 状态推进的单调性由 SQL 层面的守卫保证：UPDATE 只在目标
/// 状态严格高于当前状态时生效，并发确认谁先落库谁生效，
/// 后到的一方自然成为空操作。
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// 把状态文本映射为可比较的序号，用于 SQL 里的前进守卫。
const STATUS_RANK: &str =
    "CASE status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 WHEN 'read' THEN 2 END";
const TARGET_RANK: &str =
    "CASE $2 WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 WHEN 'read' THEN 2 END";

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn find_all(&self) -> Result<Vec<Message>, RepositoryError> {
        let records: Vec<MessageRecord> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM messages ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn insert(&self, message: Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages (id, sender, body, kind, status, created_at, delivered_at, read_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::from(message.id))
        .bind(message.sender.as_str())
        .bind(&message.body)
        .bind(message.kind.as_str())
        .bind(message.status.as_str())
        .bind(message.created_at)
        .bind(message.delivered_at)
        .bind(message.read_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record: Option<MessageRecord> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn update_status(
        &self,
        id: MessageId,
        to: MessageStatus,
        at: Timestamp,
    ) -> Result<Option<Message>, RepositoryError> {
        let record: Option<MessageRecord> = sqlx::query_as(&format!(
            "UPDATE messages
             SET status = $2,
                 delivered_at = COALESCE(delivered_at, $3),
                 read_at = CASE WHEN $2 = 'read' THEN COALESCE(read_at, $3) ELSE read_at END
             WHERE id = $1 AND {STATUS_RANK} < {TARGET_RANK}
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(Uuid::from(id))
        .bind(to.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => Ok(Some(Message::try_from(record)?)),
            // 没有行被更新：要么是幂等空操作，要么消息不存在
            None => match self.find_by_id(id).await? {
                Some(_) => Ok(None),
                None => Err(RepositoryError::NotFound),
            },
        }
    }

    async fn update_many_status(
        &self,
        ids: &[MessageId],
        to: MessageStatus,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        let raw_ids: Vec<Uuid> = ids.iter().map(|id| Uuid::from(*id)).collect();
        sqlx::query(&format!(
            "UPDATE messages
             SET status = $2,
                 delivered_at = COALESCE(delivered_at, $3),
                 read_at = CASE WHEN $2 = 'read' THEN COALESCE(read_at, $3) ELSE read_at END
             WHERE id = ANY($1) AND {STATUS_RANK} < {TARGET_RANK}"
        ))
        .bind(&raw_ids)
        .bind(to.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_pending_from(&self, sender: Identity) -> Result<Vec<Message>, RepositoryError> {
        let records: Vec<MessageRecord> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM messages
             WHERE status = 'sent' AND sender = $1
             ORDER BY created_at"
        ))
        .bind(sender.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }
}
