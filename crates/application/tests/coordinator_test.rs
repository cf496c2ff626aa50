//! 协调服务端到端测试：用内存存储、录制广播器和手动时钟
//! 驱动完整的事件流。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use application::{
    BroadcastError, Broadcaster, Clock, CoordinatorDependencies, CoordinatorService,
    MemoryMessageStore, MessageStore, OutboundEvent,
};
use async_trait::async_trait;
use config::RateLimitConfig;
use domain::{ConnectionId, Identity, MessageKind, MessageStatus, Timestamp};
use time::OffsetDateTime;

/// 录制广播器：记下每个事件和它的目标。None 表示全体广播。
#[derive(Default)]
struct RecordingBroadcaster {
    events: Mutex<Vec<(Option<ConnectionId>, OutboundEvent)>>,
}

impl RecordingBroadcaster {
    fn all(&self) -> Vec<(Option<ConnectionId>, OutboundEvent)> {
        self.events.lock().unwrap().clone()
    }

    fn to_connection(&self, connection: ConnectionId) -> Vec<OutboundEvent> {
        self.all()
            .into_iter()
            .filter(|(target, _)| *target == Some(connection))
            .map(|(_, event)| event)
            .collect()
    }

    fn broadcasts(&self) -> Vec<OutboundEvent> {
        self.all()
            .into_iter()
            .filter(|(target, _)| target.is_none())
            .map(|(_, event)| event)
            .collect()
    }

    fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn emit_to_all(&self, event: OutboundEvent) -> Result<(), BroadcastError> {
        self.events.lock().unwrap().push((None, event));
        Ok(())
    }

    async fn emit_to_connection(
        &self,
        connection: ConnectionId,
        event: OutboundEvent,
    ) -> Result<(), BroadcastError> {
        self.events.lock().unwrap().push((Some(connection), event));
        Ok(())
    }
}

/// 手动时钟，测试里显式拨动。
struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    fn advance(&self, by: time::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

struct Harness {
    coordinator: CoordinatorService,
    store: Arc<MemoryMessageStore>,
    broadcaster: Arc<RecordingBroadcaster>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryMessageStore::new());
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
    let coordinator = CoordinatorService::new(CoordinatorDependencies {
        store: store.clone(),
        broadcaster: broadcaster.clone(),
        clock: clock.clone(),
        rate_limit: RateLimitConfig {
            window_secs: 30,
            max_events: 25,
        },
    });
    Harness {
        coordinator,
        store,
        broadcaster,
        clock,
    }
}

async fn claim(h: &Harness, connection: ConnectionId, identity: Identity) {
    assert!(h
        .coordinator
        .claim_identity(connection, identity)
        .await
        .unwrap());
}

fn status_changes(events: &[OutboundEvent]) -> Vec<(domain::MessageId, MessageStatus)> {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::MessageStatusChanged {
                message_id, status, ..
            } => Some((*message_id, *status)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn identity_claim_is_exclusive() {
    let h = harness();
    let first = ConnectionId::new();
    let second = ConnectionId::new();

    let (a, b) = tokio::join!(
        h.coordinator.claim_identity(first, Identity::A),
        h.coordinator.claim_identity(second, Identity::A),
    );
    let granted = [a.unwrap(), b.unwrap()];
    // 恰好一个成功
    assert_eq!(granted.iter().filter(|g| **g).count(), 1);
}

#[tokio::test]
async fn reclaim_does_not_storm_broadcasts() {
    let h = harness();
    let conn = ConnectionId::new();
    claim(&h, conn, Identity::A).await;

    let broadcasts_after_first = h.broadcaster.broadcasts().len();
    claim(&h, conn, Identity::A).await;

    // 重复认领只多一条定向的 claim-result，不触发新的全体广播
    assert_eq!(h.broadcaster.broadcasts().len(), broadcasts_after_first);
}

#[tokio::test]
async fn send_while_peer_online_is_delivered_immediately() {
    let h = harness();
    let conn_a = ConnectionId::new();
    let conn_b = ConnectionId::new();
    claim(&h, conn_a, Identity::A).await;
    claim(&h, conn_b, Identity::B).await;
    h.broadcaster.clear();

    let message = h
        .coordinator
        .send_message(conn_a, Identity::A, "hi", MessageKind::Text)
        .await
        .unwrap()
        .expect("not rate limited");

    // 对方在线，同一操作内直接升级为 delivered
    assert_eq!(message.status, MessageStatus::Delivered);
    assert!(message.delivered_at.is_some());

    // 全体广播里有一条 message-created
    let created: Vec<_> = h
        .broadcaster
        .broadcasts()
        .into_iter()
        .filter(|e| matches!(e, OutboundEvent::MessageCreated { .. }))
        .collect();
    assert_eq!(created.len(), 1);

    // 发送方单独收到 delivered 升级
    let to_a = status_changes(&h.broadcaster.to_connection(conn_a));
    assert_eq!(to_a, vec![(message.id, MessageStatus::Delivered)]);

    // 随后 B 确认已读，发送方通过全体广播看到 read
    h.broadcaster.clear();
    h.coordinator
        .ack_read(conn_b, message.id, Identity::B)
        .await
        .unwrap();
    let broadcast_changes = status_changes(&h.broadcaster.broadcasts());
    assert_eq!(broadcast_changes, vec![(message.id, MessageStatus::Read)]);
}

#[tokio::test]
async fn send_while_peer_offline_stays_sent_until_reconnect() {
    let h = harness();
    let conn_a = ConnectionId::new();
    claim(&h, conn_a, Identity::A).await;

    let message = h
        .coordinator
        .send_message(conn_a, Identity::A, "are you there", MessageKind::Text)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.status, MessageStatus::Sent);

    // B 上线，认领流程内完成补投递，无需显式 ack
    let conn_b = ConnectionId::new();
    claim(&h, conn_b, Identity::B).await;

    let stored = h.store.find_by_id(message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Delivered);
}

#[tokio::test]
async fn reconnect_flushes_all_pending_messages() {
    let h = harness();
    let conn_a = ConnectionId::new();
    claim(&h, conn_a, Identity::A).await;

    let mut ids = Vec::new();
    for body in ["one", "two", "three"] {
        let message = h
            .coordinator
            .send_message(conn_a, Identity::A, body, MessageKind::Text)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.status, MessageStatus::Sent);
        ids.push(message.id);
    }

    h.broadcaster.clear();
    let conn_b = ConnectionId::new();
    claim(&h, conn_b, Identity::B).await;

    // A 的连接收到三条逐条的升级通知
    let to_a = status_changes(&h.broadcaster.to_connection(conn_a));
    assert_eq!(to_a.len(), 3);
    for (message_id, status) in &to_a {
        assert!(ids.contains(message_id));
        assert_eq!(*status, MessageStatus::Delivered);
    }

    for id in ids {
        let stored = h.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
    }
}

#[tokio::test]
async fn status_never_regresses() {
    let h = harness();
    let conn_a = ConnectionId::new();
    let conn_b = ConnectionId::new();
    claim(&h, conn_a, Identity::A).await;
    claim(&h, conn_b, Identity::B).await;

    let message = h
        .coordinator
        .send_message(conn_a, Identity::A, "hi", MessageKind::Text)
        .await
        .unwrap()
        .unwrap();

    h.coordinator
        .ack_read(conn_b, message.id, Identity::B)
        .await
        .unwrap();
    // 重复 read 与 read 之后的 delivered 都必须是空操作
    h.coordinator
        .ack_read(conn_b, message.id, Identity::B)
        .await
        .unwrap();
    h.coordinator
        .ack_delivered(conn_b, message.id, Identity::B)
        .await
        .unwrap();

    let stored = h.store.find_by_id(message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Read);
}

#[tokio::test]
async fn sender_cannot_ack_own_message() {
    let h = harness();
    let conn_a = ConnectionId::new();
    let conn_b = ConnectionId::new();
    claim(&h, conn_a, Identity::A).await;
    claim(&h, conn_b, Identity::B).await;

    let message = h
        .coordinator
        .send_message(conn_a, Identity::A, "hi", MessageKind::Text)
        .await
        .unwrap()
        .unwrap();

    // 发送方确认自己的消息：静默丢弃，不崩溃不生效
    h.coordinator
        .ack_read(conn_a, message.id, Identity::A)
        .await
        .unwrap();
    let stored = h.store.find_by_id(message.id).await.unwrap().unwrap();
    assert_ne!(stored.status, MessageStatus::Read);
}

#[tokio::test]
async fn connection_cannot_act_for_identity_it_does_not_hold() {
    let h = harness();
    let conn_a = ConnectionId::new();
    let conn_b = ConnectionId::new();
    claim(&h, conn_a, Identity::A).await;
    claim(&h, conn_b, Identity::B).await;

    // B 的连接冒用 A 的身份发消息：静默丢弃，什么都不落库
    let spoofed = h
        .coordinator
        .send_message(conn_b, Identity::A, "spoofed", MessageKind::Text)
        .await
        .unwrap();
    assert!(spoofed.is_none());
    assert!(h.store.find_all().await.unwrap().is_empty());

    // A 正常发一条，然后 A 的连接冒用 B 的身份确认已读
    let message = h
        .coordinator
        .send_message(conn_a, Identity::A, "hi", MessageKind::Text)
        .await
        .unwrap()
        .unwrap();
    h.coordinator
        .ack_read(conn_a, message.id, Identity::B)
        .await
        .unwrap();

    let stored = h.store.find_by_id(message.id).await.unwrap().unwrap();
    assert_ne!(stored.status, MessageStatus::Read);
}

#[tokio::test]
async fn reconciliation_recovers_from_lost_disconnect() {
    let h = harness();
    let conn_b = ConnectionId::new();
    claim(&h, conn_b, Identity::B).await;

    // 断连通知丢失：连接已经不在存活集合里，但没人调用 disconnect
    h.clock.advance(time::Duration::seconds(10));
    let live: HashSet<ConnectionId> = HashSet::new();
    h.coordinator.reconcile(&live).await;

    h.broadcaster.clear();
    let observer = ConnectionId::new();
    h.coordinator.request_presence(observer).await;

    let events = h.broadcaster.to_connection(observer);
    let OutboundEvent::PresenceChanged { presence } = &events[0] else {
        panic!("expected presence snapshot");
    };
    let record = &presence[&Identity::B];
    assert!(!record.is_online);
    assert_eq!(record.last_seen, h.clock.now());

    // 身份锁也被释放，之后可以被新连接认领
    let newcomer = ConnectionId::new();
    assert!(h
        .coordinator
        .claim_identity(newcomer, Identity::B)
        .await
        .unwrap());
}

#[tokio::test]
async fn rate_limiter_drops_twenty_sixth_send() {
    let h = harness();
    let conn_a = ConnectionId::new();
    let conn_b = ConnectionId::new();
    claim(&h, conn_a, Identity::A).await;
    claim(&h, conn_b, Identity::B).await;

    let mut accepted = 0;
    let mut dropped = 0;
    for i in 0..26 {
        let result = h
            .coordinator
            .send_message(conn_a, Identity::A, format!("msg {i}"), MessageKind::Text)
            .await
            .unwrap();
        match result {
            Some(_) => accepted += 1,
            None => dropped += 1,
        }
    }

    assert_eq!(accepted, 25);
    assert_eq!(dropped, 1);
    assert_eq!(h.store.find_all().await.unwrap().len(), 25);
}

#[tokio::test]
async fn connect_replays_history_in_order() {
    let h = harness();
    let conn_a = ConnectionId::new();
    claim(&h, conn_a, Identity::A).await;
    for body in ["first", "second"] {
        h.coordinator
            .send_message(conn_a, Identity::A, body, MessageKind::Text)
            .await
            .unwrap();
        h.clock.advance(time::Duration::seconds(1));
    }

    let newcomer = ConnectionId::new();
    h.broadcaster.clear();
    h.coordinator.connect(newcomer).await.unwrap();

    let events = h.broadcaster.to_connection(newcomer);
    // 连接建立时收到占用列表、在线状态和历史
    assert!(matches!(
        events[0],
        OutboundEvent::IdentityAvailability { .. }
    ));
    assert!(matches!(events[1], OutboundEvent::PresenceChanged { .. }));
    let OutboundEvent::History { messages } = &events[2] else {
        panic!("expected history replay");
    };
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].body, "first");
    assert_eq!(messages[1].body, "second");
}

#[tokio::test]
async fn disconnect_releases_identity_and_stamps_last_seen() {
    let h = harness();
    let conn = ConnectionId::new();
    claim(&h, conn, Identity::A).await;

    h.clock.advance(time::Duration::seconds(42));
    h.coordinator.disconnect(conn).await;

    let observer = ConnectionId::new();
    h.broadcaster.clear();
    h.coordinator.request_presence(observer).await;
    let events = h.broadcaster.to_connection(observer);
    let OutboundEvent::PresenceChanged { presence } = &events[0] else {
        panic!("expected presence snapshot");
    };
    assert!(!presence[&Identity::A].is_online);
    assert_eq!(presence[&Identity::A].last_seen, h.clock.now());

    // 释放后身份可以被别的连接认领
    let next = ConnectionId::new();
    assert!(h
        .coordinator
        .claim_identity(next, Identity::A)
        .await
        .unwrap());
}