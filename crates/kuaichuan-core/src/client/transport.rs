//! HTTP 传输客户端
//!
//! 封装所有请求/响应式调用: 简单上传、分块三步协议、文本与删除操作、
//! 登录与认证检查。推送通道由 [`crate::client::sync`] 单独持有。
//!
//! # 认证
//!
//! 登录成功后持有不透明 Bearer 令牌。任何调用收到 401 时本地令牌
//! 立即清除 —— 去认证信号优先于推送通道上可能迟到的旧状态。

use log::{debug, warn};
use std::sync::RwLock;
use std::time::Duration;

use crate::error::ShareError;
use crate::protocol::{
    AuthResponse, ChunkCompleteRequest, ChunkInitRequest, ChunkInitResponse, ChunkUploadResponse,
    FileDeleteRequest, FileRecord, IpListResponse, LoginRequest, MessageDeleteRequest,
    SelectedDownloadRequest, TextMessage, TextSendRequest,
};

/// 每次 HTTP 调用的超时上限
///
/// 超时按传输失败处理，进入与网络错误相同的按块重试路径。
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP API 客户端
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// 创建客户端，`base_url` 形如 `http://192.168.1.5:5000`
    pub fn new(base_url: impl Into<String>) -> Result<Self, ShareError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 当前是否持有令牌
    pub fn is_authenticated(&self) -> bool {
        self.token.read().expect("token lock poisoned").is_some()
    }

    /// 推送通道地址 (携带令牌)
    pub fn ws_url(&self) -> String {
        let scheme_swapped = self
            .base_url
            .replacen("http://", "ws://", 1)
            .replacen("https://", "wss://", 1);
        match self.token.read().expect("token lock poisoned").as_deref() {
            Some(token) => format!("{}/ws?token={}", scheme_swapped, token),
            None => format!("{}/ws", scheme_swapped),
        }
    }

    fn bearer(&self) -> Option<String> {
        self.token.read().expect("token lock poisoned").clone()
    }

    /// 响应状态检查
    ///
    /// 非 2xx 映射为 [`ShareError`]; 401 同时清除本地令牌。
    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, ShareError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status.as_u16() == 401 {
            warn!("Server returned 401, dropping local token");
            self.token.write().expect("token lock poisoned").take();
        }
        let message = resp.text().await.unwrap_or_default();
        Err(ShareError::from_status(status.as_u16(), message))
    }

    fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.bearer() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// 登录，成功后令牌保存在客户端内
    pub async fn login(&self, password: &str) -> Result<bool, ShareError> {
        let resp = self
            .http
            .post(format!("{}/api/login", self.base_url))
            .json(&LoginRequest {
                password: password.to_string(),
            })
            .send()
            .await?;
        let resp = self.check(resp).await?;
        let auth: AuthResponse = resp.json().await?;
        if auth.authenticated {
            *self.token.write().expect("token lock poisoned") = auth.token;
        }
        Ok(auth.authenticated)
    }

    /// 检查当前令牌是否仍被服务端认可
    pub async fn auth_check(&self) -> Result<bool, ShareError> {
        let req = self.with_auth(self.http.get(format!("{}/api/auth", self.base_url)));
        let resp = self.check(req.send().await?).await?;
        let auth: AuthResponse = resp.json().await?;
        Ok(auth.authenticated)
    }

    /// 简单路径: 整个文件一次请求上传，控制器不重试
    pub async fn simple_upload(&self, filename: &str, bytes: Vec<u8>) -> Result<(), ShareError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("files", part);
        let req = self.with_auth(
            self.http
                .post(format!("{}/upload", self.base_url))
                .multipart(form),
        );
        self.check(req.send().await?).await?;
        Ok(())
    }

    /// 创建分块会话，返回会话 id
    pub async fn chunk_init(
        &self,
        filename: &str,
        total_chunks: u64,
    ) -> Result<String, ShareError> {
        let req = self.with_auth(
            self.http
                .post(format!("{}/api/chunk/init", self.base_url))
                .json(&ChunkInitRequest {
                    filename: filename.to_string(),
                    total_chunks,
                }),
        );
        let resp = self.check(req.send().await?).await?;
        let init: ChunkInitResponse = resp.json().await?;
        debug!("chunk session {} opened for {}", init.session_id, filename);
        Ok(init.session_id)
    }

    /// 上传单个分块，返回服务端确认的序号
    pub async fn chunk_upload(
        &self,
        session_id: &str,
        index: u64,
        bytes: Vec<u8>,
    ) -> Result<u64, ShareError> {
        let index_param = index.to_string();
        let req = self.with_auth(
            self.http
                .post(format!("{}/api/chunk/upload", self.base_url))
                .query(&[("sessionId", session_id), ("index", index_param.as_str())])
                .body(bytes),
        );
        let resp = self.check(req.send().await?).await?;
        let ack: ChunkUploadResponse = resp.json().await?;
        Ok(ack.index)
    }

    /// 完成会话并触发服务端装配
    pub async fn chunk_complete(&self, session_id: &str, filename: &str) -> Result<(), ShareError> {
        let req = self.with_auth(
            self.http
                .post(format!("{}/api/chunk/complete", self.base_url))
                .json(&ChunkCompleteRequest {
                    session_id: session_id.to_string(),
                    filename: filename.to_string(),
                }),
        );
        self.check(req.send().await?).await?;
        Ok(())
    }

    /// 发送文本消息，空内容在本地拒绝
    pub async fn send_text(&self, content: &str) -> Result<(), ShareError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ShareError::UserInput("empty message".to_string()));
        }
        let req = self.with_auth(
            self.http
                .post(format!("{}/api/text", self.base_url))
                .json(&TextSendRequest {
                    content: content.to_string(),
                }),
        );
        self.check(req.send().await?).await?;
        Ok(())
    }

    /// 删除消息，身份为 `(content, time)` 对
    pub async fn delete_message(&self, content: &str, time: &str) -> Result<(), ShareError> {
        let req = self.with_auth(
            self.http
                .post(format!("{}/api/message/delete", self.base_url))
                .json(&MessageDeleteRequest {
                    content: content.to_string(),
                    time: time.to_string(),
                }),
        );
        self.check(req.send().await?).await?;
        Ok(())
    }

    /// 删除文件
    pub async fn delete_file(&self, filename: &str) -> Result<(), ShareError> {
        let req = self.with_auth(
            self.http
                .post(format!("{}/api/file/delete", self.base_url))
                .json(&FileDeleteRequest {
                    filename: filename.to_string(),
                }),
        );
        self.check(req.send().await?).await?;
        Ok(())
    }

    /// 拉取权威文件列表
    pub async fn fetch_files(&self) -> Result<Vec<FileRecord>, ShareError> {
        let req = self.with_auth(self.http.get(format!("{}/api/files", self.base_url)));
        let resp = self.check(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    /// 拉取权威消息列表
    pub async fn fetch_messages(&self) -> Result<Vec<TextMessage>, ShareError> {
        let req = self.with_auth(self.http.get(format!("{}/api/messages", self.base_url)));
        let resp = self.check(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    /// 拉取本机可达地址列表
    pub async fn fetch_ips(&self) -> Result<IpListResponse, ShareError> {
        let req = self.with_auth(self.http.get(format!("{}/api/ips", self.base_url)));
        let resp = self.check(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    /// 批量下载勾选文件 (ZIP)，空选择在本地拒绝
    pub async fn download_selected(&self, names: &[String]) -> Result<Vec<u8>, ShareError> {
        if names.is_empty() {
            return Err(ShareError::UserInput("no files selected".to_string()));
        }
        let req = self.with_auth(
            self.http
                .post(format!("{}/download_selected", self.base_url))
                .json(&SelectedDownloadRequest {
                    selected: names.to_vec(),
                }),
        );
        let resp = self.check(req.send().await?).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// 下载单个文件
    pub async fn download_file(&self, filename: &str) -> Result<Vec<u8>, ShareError> {
        let req = self.with_auth(
            self.http
                .get(format!("{}/uploads/{}", self.base_url, filename)),
        );
        let resp = self.check(req.send().await?).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_scheme_swap() {
        let client = ApiClient::new("http://192.168.1.5:5000/").unwrap();
        assert_eq!(client.ws_url(), "ws://192.168.1.5:5000/ws");
    }

    #[test]
    fn test_empty_text_rejected_locally() {
        let client = ApiClient::new("http://localhost:5000").unwrap();
        let err = futures_util::FutureExt::now_or_never(client.send_text("   "))
            .expect("local validation must not await")
            .unwrap_err();
        assert!(matches!(err, ShareError::UserInput(_)));
    }

    #[test]
    fn test_empty_selection_rejected_locally() {
        let client = ApiClient::new("http://localhost:5000").unwrap();
        let err = futures_util::FutureExt::now_or_never(client.download_selected(&[]))
            .expect("local validation must not await")
            .unwrap_err();
        assert!(matches!(err, ShareError::UserInput(_)));
    }
}
