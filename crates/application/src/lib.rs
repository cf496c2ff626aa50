//! 应用层实现。
//!
//! 这里提供双人会话的协调逻辑：身份独占、在线状态追踪与对账、
//! 消息投递状态机、事件限流，以及对外部适配器（消息存储、
//! 事件广播）的抽象。

pub mod broadcaster;
pub mod clock;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod identity_lock;
pub mod presence;
pub mod rate_limiter;
pub mod store;

pub use broadcaster::{BroadcastError, Broadcaster, OutboundEvent, PresenceView};
pub use clock::{Clock, SystemClock};
pub use coordinator::{CoordinatorService, CoordinatorDependencies, CoreState};
pub use delivery::DeliveryCoordinator;
pub use error::{ApplicationError, ApplicationResult};
pub use identity_lock::{ClaimGrant, IdentityLock};
pub use presence::PresenceTracker;
pub use rate_limiter::{EventKind, RateLimiter};
pub use store::{memory::MemoryMessageStore, MessageStore};
