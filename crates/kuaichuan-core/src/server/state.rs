//! 服务端共享状态
//!
//! 权威的文件/消息状态、推送广播通道与访问口令门禁。
//! 文件列表的权威副本就是上传目录本身，消息保存在内存中
//! (进程重启即丢失，与观察到的行为一致)。

use log::info;
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::config::AppSettings;
use crate::protocol::{FileRecord, MESSAGE_RETENTION, PushEvent, TextMessage};
use crate::server::registry::UploadRegistry;
use crate::server::storage;

/// 访问口令门禁
///
/// 口令以 SHA-256 摘要比对; 令牌是不透明 uuid，仅存于进程内存。
struct AuthGate {
    password_digest: [u8; 32],
    tokens: StdMutex<HashSet<String>>,
}

impl AuthGate {
    fn new(password: &str) -> Self {
        Self {
            password_digest: Sha256::digest(password.as_bytes()).into(),
            tokens: StdMutex::new(HashSet::new()),
        }
    }

    fn verify(&self, password: &str) -> bool {
        let digest: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        digest == self.password_digest
    }

    fn issue(&self) -> String {
        let token = Uuid::new_v4().to_string();
        self.tokens
            .lock()
            .expect("token lock poisoned")
            .insert(token.clone());
        token
    }

    fn check(&self, token: Option<&str>) -> bool {
        match token {
            Some(t) => self.tokens.lock().expect("token lock poisoned").contains(t),
            None => false,
        }
    }
}

/// 服务端共享状态
pub struct ServerState {
    pub registry: UploadRegistry,
    upload_dir: PathBuf,
    messages: Mutex<VecDeque<TextMessage>>,
    push_tx: broadcast::Sender<PushEvent>,
    auth: Option<AuthGate>,
}

impl ServerState {
    pub fn new(settings: &AppSettings) -> Self {
        let (push_tx, _) = broadcast::channel(64);
        Self {
            registry: UploadRegistry::new(settings.upload_dir.clone()),
            upload_dir: settings.upload_dir.clone(),
            messages: Mutex::new(VecDeque::new()),
            push_tx,
            auth: settings.password.as_deref().map(AuthGate::new),
        }
    }

    pub fn upload_dir(&self) -> &PathBuf {
        &self.upload_dir
    }

    /// 订阅推送事件
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.push_tx.subscribe()
    }

    /// 向所有在线客户端广播事件
    pub fn publish(&self, event: PushEvent) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.push_tx.send(event);
    }

    /// 追加消息并广播，超出保留上限时淘汰最旧的
    pub async fn push_message(&self, content: &str) -> TextMessage {
        let message = TextMessage::now(content);
        {
            let mut messages = self.messages.lock().await;
            messages.push_front(message.clone());
            while messages.len() > MESSAGE_RETENTION {
                messages.pop_back();
            }
        }
        self.publish(PushEvent::NewMessage {
            message: message.clone(),
        });
        message
    }

    /// 删除第一条 `(content, time)` 匹配的消息
    ///
    /// 无匹配时静默成功，不广播。
    pub async fn delete_message(&self, content: &str, time: &str) -> bool {
        let removed = {
            let mut messages = self.messages.lock().await;
            match messages
                .iter()
                .position(|m| m.content == content && m.time == time)
            {
                Some(pos) => {
                    messages.remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.publish(PushEvent::MessageDeleted {
                content: content.to_string(),
                time: time.to_string(),
            });
        }
        removed
    }

    /// 消息快照，最新在前
    pub async fn messages_snapshot(&self) -> Vec<TextMessage> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// 文件快照，按 mtime 倒序
    pub async fn files_snapshot(&self) -> std::io::Result<Vec<FileRecord>> {
        storage::scan_files(&self.upload_dir).await
    }

    /// 是否配置了访问口令
    pub fn requires_auth(&self) -> bool {
        self.auth.is_some()
    }

    /// 校验口令，成功则签发令牌
    pub fn login(&self, password: &str) -> Option<String> {
        match &self.auth {
            Some(gate) if gate.verify(password) => {
                info!("login accepted, issuing token");
                Some(gate.issue())
            }
            Some(_) => None,
            // 未配置口令时登录总是成功，无需令牌
            None => Some(String::new()),
        }
    }

    /// 校验请求携带的令牌
    pub fn check_token(&self, token: Option<&str>) -> bool {
        match &self.auth {
            Some(gate) => gate.check(token),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_password(password: Option<&str>) -> ServerState {
        let settings = AppSettings {
            password: password.map(String::from),
            upload_dir: std::env::temp_dir().join("kuaichuan-test-uploads"),
            ..Default::default()
        };
        ServerState::new(&settings)
    }

    #[test]
    fn test_no_password_means_open_access() {
        let state = state_with_password(None);
        assert!(!state.requires_auth());
        assert!(state.check_token(None));
        assert!(state.check_token(Some("anything")));
    }

    #[test]
    fn test_login_issues_token() {
        let state = state_with_password(Some("secret"));
        assert!(state.requires_auth());
        assert!(!state.check_token(None));
        assert!(state.login("wrong").is_none());

        let token = state.login("secret").unwrap();
        assert!(state.check_token(Some(&token)));
        assert!(!state.check_token(Some("forged")));
    }

    #[tokio::test]
    async fn test_message_retention_cap() {
        let state = state_with_password(None);
        for i in 0..=MESSAGE_RETENTION {
            state.push_message(&format!("msg-{}", i)).await;
        }
        let snapshot = state.messages_snapshot().await;
        assert_eq!(snapshot.len(), MESSAGE_RETENTION);
        assert_eq!(snapshot[0].content, format!("msg-{}", MESSAGE_RETENTION));
        assert_eq!(snapshot.last().unwrap().content, "msg-1");
    }

    #[tokio::test]
    async fn test_delete_missing_message_is_noop() {
        let state = state_with_password(None);
        let msg = state.push_message("hi").await;

        assert!(!state.delete_message("hi", "1999-01-01 00:00:00").await);
        assert_eq!(state.messages_snapshot().await.len(), 1);

        assert!(state.delete_message(&msg.content, &msg.time).await);
        assert!(state.messages_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_push_events_broadcast() {
        let state = state_with_password(None);
        let mut rx = state.subscribe();

        state.push_message("hello").await;
        match rx.try_recv().unwrap() {
            PushEvent::NewMessage { message } => assert_eq!(message.content, "hello"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
