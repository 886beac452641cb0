//! 错误类型
//!
//! 客户端与服务端各自的错误分类:
//!
//! - [`ShareError`]: 客户端调用失败的分类，决定重试/终止/去认证行为
//! - [`RegistryError`]: 分块会话仓库的拒绝原因

use thiserror::Error;

/// 客户端错误分类
#[derive(Debug, Error)]
pub enum ShareError {
    /// 网络/连接层失败，分块粒度可重试
    #[error("transport error: {0}")]
    Transport(String),

    /// 服务端返回非 2xx
    #[error("server rejected request ({status}): {message}")]
    Protocol { status: u16, message: String },

    /// 401，全局去认证信号
    #[error("not authenticated")]
    Auth,

    /// 本地输入校验失败，不发起网络调用
    #[error("invalid input: {0}")]
    UserInput(String),
}

impl ShareError {
    /// 由 HTTP 状态码构造
    ///
    /// 401 一律映射为 [`ShareError::Auth`]，其余非 2xx 为协议错误。
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status == 401 {
            ShareError::Auth
        } else {
            ShareError::Protocol {
                status,
                message: message.into(),
            }
        }
    }

    /// 是否允许按分块重试
    ///
    /// 传输错误总是可重试; 未知会话 (404) 与认证失败是终止性的。
    pub fn is_chunk_retryable(&self) -> bool {
        match self {
            ShareError::Transport(_) => true,
            ShareError::Protocol { status, .. } => *status != 404,
            ShareError::Auth | ShareError::UserInput(_) => false,
        }
    }
}

impl From<reqwest::Error> for ShareError {
    fn from(err: reqwest::Error) -> Self {
        ShareError::Transport(err.to_string())
    }
}

/// 分块会话仓库错误
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown or expired session: {0}")]
    UnknownSession(String),

    #[error("chunk index {index} out of range (totalChunks = {total})")]
    BadChunkIndex { index: u64, total: u64 },

    #[error("empty chunk payload")]
    EmptyChunk,

    /// 完成请求到达时收到的分块集合不完整
    #[error("session incomplete: received {received} of {total} chunks")]
    Incomplete { received: usize, total: u64 },

    #[error("totalChunks must be greater than zero")]
    EmptySession,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
