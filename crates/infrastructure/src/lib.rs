//! 基础设施层：消息存储的 PostgreSQL 实现与降级包装。

pub mod fallback_store;
pub mod message_store;

pub use fallback_store::FallbackMessageStore;
pub use message_store::{create_pg_pool, PgMessageStore};
