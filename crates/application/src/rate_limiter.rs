use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use domain::ConnectionId;

/// 受限流保护的事件类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SendMessage,
    AckDelivered,
    AckRead,
}

/// 按（连接，事件类型）维度的滑动窗口限流器。
///
/// 防止消息洪水攻击。超限的事件被静默丢弃，不向调用方
/// 返回错误，避免给探测客户端提供计时信号。
pub struct RateLimiter {
    /// 窗口内单键最大事件数
    max_events: u32,
    /// 滑动窗口长度
    window: Duration,
    /// 每键的最近事件时间戳，惰性修剪
    windows: Mutex<HashMap<(ConnectionId, EventKind), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self {
            max_events,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// 检查并记录一次事件。
    ///
    /// 窗口内计数达到上限时返回 false 且不记录；否则记录时间戳
    /// 并返回 true。
    pub fn allow(&self, connection: ConnectionId, kind: EventKind) -> bool {
        self.allow_at(connection, kind, Instant::now())
    }

    fn allow_at(&self, connection: ConnectionId, kind: EventKind, now: Instant) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            // 锁中毒只可能来自持锁线程 panic，放行比丢事件安全
            Err(poisoned) => poisoned.into_inner(),
        };

        let events = windows.entry((connection, kind)).or_default();
        while let Some(front) = events.front() {
            if now.duration_since(*front) >= self.window {
                events.pop_front();
            } else {
                break;
            }
        }

        if events.len() >= self.max_events as usize {
            return false;
        }
        events.push_back(now);
        true
    }

    /// 连接断开时丢弃它的全部窗口，RateWindow 随连接销毁。
    pub fn drop_connection(&self, connection: ConnectionId) {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        windows.retain(|(conn, _), _| *conn != connection);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(25, Duration::from_secs(30))
    }
}
