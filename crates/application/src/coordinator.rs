use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use config::RateLimitConfig;
use domain::{ConnectionId, DomainError, Identity, Message, MessageKind};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broadcaster::{Broadcaster, OutboundEvent, PresenceView};
use crate::clock::Clock;
use crate::delivery::DeliveryCoordinator;
use crate::error::ApplicationResult;
use crate::identity_lock::IdentityLock;
use crate::presence::PresenceTracker;
use crate::rate_limiter::{EventKind, RateLimiter};
use crate::store::MessageStore;

/// 核心可变状态：身份锁 + 在线状态。
///
/// 整块状态在一把锁后面，每个事件处理器持锁完成全部状态
/// 变更（run-to-completion），处理器之间不会在变更中途交错。
#[derive(Debug)]
pub struct CoreState {
    pub lock: IdentityLock,
    pub presence: PresenceTracker,
}

/// 协调服务的外部依赖。
pub struct CoordinatorDependencies {
    pub store: Arc<dyn MessageStore>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub clock: Arc<dyn Clock>,
    pub rate_limit: RateLimitConfig,
}

/// 入站事件分发表：每个传输层事件对应这里的一个方法。
///
/// 传输层只做帧解析和连接管理，所有协调语义都在这里，
/// 可以脱离传输层单独测试。
pub struct CoordinatorService {
    state: Arc<Mutex<CoreState>>,
    delivery: DeliveryCoordinator,
    store: Arc<dyn MessageStore>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    rate_limiter: RateLimiter,
}

impl CoordinatorService {
    pub fn new(deps: CoordinatorDependencies) -> Self {
        let state = Arc::new(Mutex::new(CoreState {
            lock: IdentityLock::new(),
            presence: PresenceTracker::new(deps.clock.now()),
        }));
        let delivery = DeliveryCoordinator::new(
            state.clone(),
            deps.store.clone(),
            deps.broadcaster.clone(),
            deps.clock.clone(),
        );
        Self {
            state,
            delivery,
            store: deps.store,
            broadcaster: deps.broadcaster,
            clock: deps.clock,
            rate_limiter: RateLimiter::new(
                deps.rate_limit.max_events,
                Duration::from_secs(deps.rate_limit.window_secs),
            ),
        }
    }

    async fn emit_to_all(&self, event: OutboundEvent) {
        if let Err(err) = self.broadcaster.emit_to_all(event).await {
            warn!(error = %err, "broadcast to all failed");
        }
    }

    async fn emit_to_connection(&self, connection: ConnectionId, event: OutboundEvent) {
        if let Err(err) = self.broadcaster.emit_to_connection(connection, event).await {
            warn!(connection = %connection, error = %err, "broadcast to connection failed");
        }
    }

    async fn availability_event(&self) -> OutboundEvent {
        let held = self.state.lock().await.lock.held_identities();
        OutboundEvent::IdentityAvailability { held }
    }

    async fn presence_event(&self) -> OutboundEvent {
        let snapshot = self.state.lock().await.presence.snapshot();
        let presence: HashMap<Identity, PresenceView> = snapshot
            .into_iter()
            .map(|(identity, record)| (identity, PresenceView::from(record)))
            .collect();
        OutboundEvent::PresenceChanged { presence }
    }

    /// 新连接建立：发送当前身份占用、在线状态和历史消息。
    pub async fn connect(&self, connection: ConnectionId) -> ApplicationResult<()> {
        info!(connection = %connection, "connection established");
        let availability = self.availability_event().await;
        self.emit_to_connection(connection, availability).await;
        let presence = self.presence_event().await;
        self.emit_to_connection(connection, presence).await;

        let messages = self.store.find_all().await?;
        self.emit_to_connection(connection, OutboundEvent::History { messages })
            .await;
        Ok(())
    }

    /// 认领身份。返回是否授予。
    ///
    /// 冲突只告知发起连接；授予后补投递对方的积压消息。
    pub async fn claim_identity(
        &self,
        connection: ConnectionId,
        identity: Identity,
    ) -> ApplicationResult<bool> {
        let now = self.clock.now();
        let grant = {
            let mut state = self.state.lock().await;
            match state.lock.claim(identity, connection) {
                Ok(grant) => {
                    if let Some(prior) = grant.released_prior {
                        state.presence.mark_offline(prior, now);
                    }
                    let changed = state.presence.mark_online(identity, connection);
                    Some((grant, changed))
                }
                Err(DomainError::IdentityTaken { .. }) => None,
                Err(err) => return Err(err.into()),
            }
        };

        let Some((grant, presence_changed)) = grant else {
            debug!(connection = %connection, identity = %identity, "identity taken, claim denied");
            self.emit_to_connection(connection, OutboundEvent::ClaimResult { granted: false })
                .await;
            return Ok(false);
        };

        info!(
            connection = %connection,
            identity = %identity,
            reclaim = grant.reclaim,
            "identity claimed"
        );
        self.emit_to_connection(connection, OutboundEvent::ClaimResult { granted: true })
            .await;

        // 同一连接的重复认领没有状态变化，不再广播一轮
        if presence_changed || grant.released_prior.is_some() {
            let availability = self.availability_event().await;
            self.emit_to_all(availability).await;
            let presence = self.presence_event().await;
            self.emit_to_all(presence).await;
        }

        self.delivery.flush_pending_on_online(identity).await?;
        Ok(true)
    }

    /// 发送消息。限流或越权时静默丢弃并返回 None。
    pub async fn send_message(
        &self,
        connection: ConnectionId,
        sender: Identity,
        body: impl Into<String>,
        kind: MessageKind,
    ) -> ApplicationResult<Option<Message>> {
        if !self.rate_limiter.allow(connection, EventKind::SendMessage) {
            debug!(connection = %connection, "send-message rate limited, dropped");
            return Ok(None);
        }
        if !self.connection_holds(connection, sender).await {
            warn!(
                connection = %connection,
                identity = %sender,
                "send-message from connection not holding identity, dropped"
            );
            return Ok(None);
        }

        // 发消息本身就是活跃证据，顺手自愈可能被对账误杀的
        // 在线状态
        let presence_changed = {
            let mut state = self.state.lock().await;
            state.presence.mark_online(sender, connection)
        };
        if presence_changed {
            let presence = self.presence_event().await;
            self.emit_to_all(presence).await;
        }

        let message = self.delivery.send(sender, body, kind).await?;
        Ok(Some(message))
    }

    /// 送达确认。
    pub async fn ack_delivered(
        &self,
        connection: ConnectionId,
        message_id: domain::MessageId,
        identity: Identity,
    ) -> ApplicationResult<()> {
        if !self.rate_limiter.allow(connection, EventKind::AckDelivered) {
            debug!(connection = %connection, "ack-delivered rate limited, dropped");
            return Ok(());
        }
        if !self.connection_holds(connection, identity).await {
            warn!(
                connection = %connection,
                identity = %identity,
                "ack-delivered from connection not holding identity, dropped"
            );
            return Ok(());
        }
        self.delivery.acknowledge_delivered(message_id, identity).await
    }

    /// 已读确认。
    pub async fn ack_read(
        &self,
        connection: ConnectionId,
        message_id: domain::MessageId,
        identity: Identity,
    ) -> ApplicationResult<()> {
        if !self.rate_limiter.allow(connection, EventKind::AckRead) {
            debug!(connection = %connection, "ack-read rate limited, dropped");
            return Ok(());
        }
        if !self.connection_holds(connection, identity).await {
            warn!(
                connection = %connection,
                identity = %identity,
                "ack-read from connection not holding identity, dropped"
            );
            return Ok(());
        }
        self.delivery.acknowledge_read(message_id, identity).await
    }

    /// 按需回发在线状态快照。
    pub async fn request_presence(&self, connection: ConnectionId) {
        let presence = self.presence_event().await;
        self.emit_to_connection(connection, presence).await;
    }

    /// 按需回放历史消息。
    pub async fn request_history(&self, connection: ConnectionId) -> ApplicationResult<()> {
        let messages = self.store.find_all().await?;
        self.emit_to_connection(connection, OutboundEvent::History { messages })
            .await;
        Ok(())
    }

    /// 连接断开：释放身份、记录离线、销毁限流窗口。
    pub async fn disconnect(&self, connection: ConnectionId) {
        let now = self.clock.now();
        let released = {
            let mut state = self.state.lock().await;
            let released = state.lock.release(connection);
            if let Some(identity) = released {
                state.presence.mark_offline(identity, now);
            }
            released
        };
        self.rate_limiter.drop_connection(connection);

        if let Some(identity) = released {
            info!(connection = %connection, identity = %identity, "identity released on disconnect");
            let availability = self.availability_event().await;
            self.emit_to_all(availability).await;
            let presence = self.presence_event().await;
            self.emit_to_all(presence).await;
        } else {
            debug!(connection = %connection, "connection closed without held identity");
        }
    }

    /// 周期对账：以传输层的存活连接集合为准重新推导在线状态。
    ///
    /// 这是丢失断连通知后的自愈路径，必须按固定周期运行，
    /// 不依赖断连回调。与认领并发时后写者生效，不会泄漏锁。
    pub async fn reconcile(&self, live_connections: &HashSet<ConnectionId>) {
        let now = self.clock.now();
        let stale = {
            let mut state = self.state.lock().await;
            let stale = state.presence.reconcile(live_connections, now);
            for identity in &stale {
                if let Some(holder) = state.lock.holder_of(*identity) {
                    state.lock.release(holder);
                }
            }
            stale
        };

        if stale.is_empty() {
            return;
        }
        info!(identities = ?stale, "reconciliation released dead holders");
        let availability = self.availability_event().await;
        self.emit_to_all(availability).await;
        let presence = self.presence_event().await;
        self.emit_to_all(presence).await;
    }

    async fn connection_holds(&self, connection: ConnectionId, identity: Identity) -> bool {
        self.state.lock().await.lock.holder_of(identity) == Some(connection)
    }
}
