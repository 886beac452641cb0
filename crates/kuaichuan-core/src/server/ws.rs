//! WebSocket 推送通道
//!
//! 每个连接先收到 `connected` (或 `auth_required` 后即关闭)，
//! 客户端以 `pull_state` 主动拉取权威快照，此后所有状态变更
//! 经广播通道推送给全部在线连接。

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::protocol::{ClientRequest, PushEvent};
use crate::server::state::ServerState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn send_event(socket: &mut WebSocket, event: &PushEvent) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).expect("push event serializes");
    socket.send(Message::Text(json)).await
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>, token: Option<String>) {
    // 未认证的连接收到信号后即关闭，登录走 HTTP 接口
    if !state.check_token(token.as_deref()) {
        info!("push channel rejected: authentication required");
        let _ = send_event(&mut socket, &PushEvent::AuthRequired).await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    if send_event(&mut socket, &PushEvent::Connected).await.is_err() {
        return;
    }
    debug!("push channel connected");

    let mut events = BroadcastStream::new(state.subscribe());

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(event)) => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                    // 慢客户端漏掉了 n 条事件; 后续快照拉取可自愈
                    warn!("push channel lagged, {} events dropped", n);
                }
                None => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_client_request(&mut socket, &state, &text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("push channel read error: {}", e);
                    break;
                }
            },
        }
    }

    debug!("push channel closed");
}

/// 处理客户端经通道发来的请求
async fn handle_client_request(socket: &mut WebSocket, state: &ServerState, text: &str) {
    let request = match serde_json::from_str::<ClientRequest>(text) {
        Ok(request) => request,
        Err(e) => {
            warn!("invalid client request on push channel: {} ({})", text, e);
            return;
        }
    };

    match request {
        ClientRequest::PullState => {
            let files = match state.files_snapshot().await {
                Ok(files) => files,
                Err(e) => {
                    warn!("failed to scan upload dir for snapshot: {}", e);
                    Vec::new()
                }
            };
            let messages = state.messages_snapshot().await;

            let _ = send_event(socket, &PushEvent::FileList { files }).await;
            let _ = send_event(socket, &PushEvent::MessageList { messages }).await;
        }
    }
}
