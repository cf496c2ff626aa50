//! WebSocket 处理器
//!
//! 连接升级、帧解析和出入站事件路由。

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use application::OutboundEvent;
use domain::{ConnectionId, Identity, MessageId, MessageKind};

use crate::state::AppState;

/// 客户端发来的事件帧。
///
/// 身份字段保持字符串，进核心前统一过 Identity::parse，
/// 未知身份在这一层被拦下并告警，不会进入协调逻辑。
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    ClaimIdentity {
        identity: String,
    },
    SendMessage {
        sender: String,
        body: String,
        kind: MessageKind,
    },
    AckDelivered {
        message_id: MessageId,
        identity: String,
    },
    AckRead {
        message_id: MessageId,
        identity: String,
    },
    RequestPresence,
    RequestHistory,
}

/// 处理 WebSocket 连接升级。
pub async fn handle_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection = ConnectionId::new();
    info!(connection = %connection, "websocket connection established");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();

    state.registry.register(connection, tx).await;

    // 连接建立流程：当前占用列表、在线状态快照、历史回放
    if let Err(err) = state.coordinator.connect(connection).await {
        error!(connection = %connection, error = %err, "connect flow failed");
    }

    // 出站任务：事件序列化成 JSON 文本帧发出去
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to serialize outbound event");
                    break;
                }
            }
        }
    });

    // 入站循环：逐帧解析并分发，单连接内事件按到达顺序处理
    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                dispatch_frame(&state, connection, text.as_str()).await;
            }
            Ok(WsMessage::Binary(_)) => {
                debug!(connection = %connection, "binary frame ignored");
            }
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {
                // axum 自动回复 ping，这里无事可做
            }
            Ok(WsMessage::Close(_)) => {
                info!(connection = %connection, "websocket closed by client");
                break;
            }
            Err(err) => {
                warn!(connection = %connection, error = %err, "websocket error");
                break;
            }
        }
    }

    // 断连清理：注销通道、释放身份、记录离线
    send_task.abort();
    state.registry.unregister(connection).await;
    state.coordinator.disconnect(connection).await;
    info!(connection = %connection, "websocket connection cleaned up");
}

fn parse_identity(connection: ConnectionId, value: &str) -> Option<Identity> {
    match Identity::parse(value) {
        Ok(identity) => Some(identity),
        Err(err) => {
            // 未知身份值：本地告警后丢弃，不广播不崩溃
            warn!(connection = %connection, error = %err, "invalid identity in frame, dropped");
            None
        }
    }
}

async fn dispatch_frame(state: &AppState, connection: ConnectionId, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            warn!(connection = %connection, error = %err, "malformed client frame, dropped");
            return;
        }
    };

    let result = match event {
        ClientEvent::ClaimIdentity { identity } => {
            let Some(identity) = parse_identity(connection, &identity) else {
                return;
            };
            state
                .coordinator
                .claim_identity(connection, identity)
                .await
                .map(|_| ())
        }
        ClientEvent::SendMessage { sender, body, kind } => {
            let Some(sender) = parse_identity(connection, &sender) else {
                return;
            };
            state
                .coordinator
                .send_message(connection, sender, body, kind)
                .await
                .map(|_| ())
        }
        ClientEvent::AckDelivered {
            message_id,
            identity,
        } => {
            let Some(identity) = parse_identity(connection, &identity) else {
                return;
            };
            state
                .coordinator
                .ack_delivered(connection, message_id, identity)
                .await
        }
        ClientEvent::AckRead {
            message_id,
            identity,
        } => {
            let Some(identity) = parse_identity(connection, &identity) else {
                return;
            };
            state
                .coordinator
                .ack_read(connection, message_id, identity)
                .await
        }
        ClientEvent::RequestPresence => {
            state.coordinator.request_presence(connection).await;
            Ok(())
        }
        ClientEvent::RequestHistory => state.coordinator.request_history(connection).await,
    };

    if let Err(err) = result {
        error!(connection = %connection, error = %err, "event handler failed");
    }
}
