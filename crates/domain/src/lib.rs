//! 双人会话系统核心领域模型
//!
//! 包含身份、连接、消息等核心类型，以及消息状态机的业务规则。

pub mod errors;
pub mod message;
pub mod presence;
pub mod value_objects;

// 重新导出常用类型
pub use errors::{DomainError, DomainResult, RepositoryError, RepositoryResult};
pub use message::{Message, MessageKind, MessageStatus};
pub use presence::PresenceRecord;
pub use value_objects::{ConnectionId, Identity, MessageId, Timestamp};
