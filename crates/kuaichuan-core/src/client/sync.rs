//! 实时状态同步器
//!
//! 每个连接一个 [`SyncSession`]，独占持有自己的 WebSocket 通道并写入
//! 注入的视图模型，生命周期与连接绑定 —— 没有模块级单例。
//!
//! # 同步模型
//!
//! 连接建立后主动拉取权威快照 (pull-on-connect)，之后增量应用推送
//! 事件 (event-on-change)。本地调用的响应与推送事件到达顺序不保证，
//! 所有合并操作幂等以容忍任一顺序。

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio_tungstenite::tungstenite::Message;

use crate::client::transport::ApiClient;
use crate::client::view::ViewStore;
use crate::error::ShareError;
use crate::protocol::{ClientRequest, PushEvent};

/// 连接状态机
///
/// `Disconnected -> Connecting -> Authenticated -> Synced`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    /// 通道就绪，快照尚未到齐
    Authenticated,
    /// 权威快照已应用，进入增量同步
    Synced,
}

/// 会话结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 服务端要求先登录; 调用方经登录调用后重新连接
    AuthRequired,
    /// 通道被对端关闭
    Closed,
}

/// 同步回调
///
/// `on_change` 在每次实际应用的变更之后显式调用，顺序是确定的:
/// 先更新集合 (文件删除时同步清理勾选集)，再通知。
pub trait SyncCallback: Send + Sync {
    /// 状态机迁移
    fn on_state(&self, state: SyncState);
    /// 视图模型发生变更
    fn on_change(&self, store: &ViewStore);
}

/// 不关心通知时的空实现
pub struct NoopSyncCallback;

impl SyncCallback for NoopSyncCallback {
    fn on_state(&self, _state: SyncState) {}
    fn on_change(&self, _store: &ViewStore) {}
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// 每连接一个的同步会话
pub struct SyncSession {
    ws: WsStream,
    state: SyncState,
}

impl SyncSession {
    /// 建立推送通道
    pub async fn connect(api: &ApiClient) -> Result<Self, ShareError> {
        let url = api.ws_url();
        info!("Connecting to push channel: {}", url);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| ShareError::Transport(e.to_string()))?;
        Ok(Self {
            ws,
            state: SyncState::Connecting,
        })
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// 运行消息循环，直到通道关闭或服务端要求认证
    pub async fn run<C: SyncCallback>(
        &mut self,
        store: &mut ViewStore,
        callback: &C,
    ) -> Result<SyncOutcome, ShareError> {
        callback.on_state(self.state);

        let mut got_files = false;
        let mut got_messages = false;

        while let Some(msg) = self.ws.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    self.state = SyncState::Disconnected;
                    callback.on_state(self.state);
                    return Err(ShareError::Transport(e.to_string()));
                }
            };

            let event = match serde_json::from_str::<PushEvent>(&text) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Invalid push event: {} ({})", text, e);
                    continue;
                }
            };

            match event {
                PushEvent::AuthRequired => {
                    info!("Server requires authentication");
                    self.state = SyncState::Disconnected;
                    callback.on_state(self.state);
                    return Ok(SyncOutcome::AuthRequired);
                }
                PushEvent::Connected => {
                    self.state = SyncState::Authenticated;
                    callback.on_state(self.state);
                    // pull-on-connect: 主动请求权威快照
                    let pull = serde_json::to_string(&ClientRequest::PullState)
                        .expect("pull_state serializes");
                    self.ws
                        .send(Message::Text(pull))
                        .await
                        .map_err(|e| ShareError::Transport(e.to_string()))?;
                }
                PushEvent::FileList { files } => {
                    debug!("snapshot: {} files", files.len());
                    store.replace_files(files);
                    got_files = true;
                    callback.on_change(store);
                    self.maybe_synced(got_files, got_messages, callback);
                }
                PushEvent::MessageList { messages } => {
                    debug!("snapshot: {} messages", messages.len());
                    store.replace_messages(messages);
                    got_messages = true;
                    callback.on_change(store);
                    self.maybe_synced(got_files, got_messages, callback);
                }
                PushEvent::FileUploaded { file } => {
                    // 上传方自己也会收到该推送; 幂等插入避免重复展示
                    if store.insert_file(file) {
                        callback.on_change(store);
                    }
                }
                PushEvent::FileDeleted { filename } => {
                    if store.remove_file(&filename) {
                        callback.on_change(store);
                    }
                }
                PushEvent::NewMessage { message } => {
                    store.push_message(message);
                    callback.on_change(store);
                }
                PushEvent::MessageDeleted { content, time } => {
                    // 无匹配时视为已删除，不通知
                    if store.remove_message(&content, &time) {
                        callback.on_change(store);
                    }
                }
            }
        }

        self.state = SyncState::Disconnected;
        callback.on_state(self.state);
        Ok(SyncOutcome::Closed)
    }

    fn maybe_synced<C: SyncCallback>(&mut self, got_files: bool, got_messages: bool, callback: &C) {
        if got_files && got_messages && self.state != SyncState::Synced {
            self.state = SyncState::Synced;
            callback.on_state(self.state);
        }
    }
}
