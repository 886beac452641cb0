//! 局域网快传协议类型
//!
//! HTTP 接口与 WebSocket 推送通道共用的线上类型定义。
//!
//! # 约定
//!
//! - 字段统一使用 camelCase JSON 命名
//! - 推送事件使用 `type` 字段区分，snake_case 命名
//! - 消息时间格式为 `%Y-%m-%d %H:%M:%S`

use chrono::Local;
use serde::{Deserialize, Serialize};

/// 分块大小 (10 MiB)
pub const CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// 简单上传阈值 (10 MiB，含边界)
///
/// 文件大小不超过该值时走单请求上传，否则走分块协议。
pub const SIMPLE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// 客户端保留的最大消息条数
pub const MESSAGE_RETENTION: usize = 100;

/// 计算文件需要的分块数量 (向上取整)
pub fn chunk_count(size_bytes: u64) -> u64 {
    size_bytes.div_ceil(CHUNK_SIZE)
}

/// 格式化字节数为人类可读形式
pub fn format_size(size_bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if size_bytes >= GB {
        format!("{:.2} GB", size_bytes as f64 / GB as f64)
    } else if size_bytes >= MB {
        format!("{:.2} MB", size_bytes as f64 / MB as f64)
    } else if size_bytes >= KB {
        format!("{:.2} KB", size_bytes as f64 / KB as f64)
    } else {
        format!("{} B", size_bytes)
    }
}

/// 文件记录
///
/// 权威副本在服务端，客户端按 mtime 倒序持有本地同步列表。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub name: String,
    /// 字节数
    pub size: u64,
    /// 上传时间 (Unix 秒)，作为排序键
    pub mtime: u64,
}

/// 文本消息
///
/// `(content, time)` 对是消息的唯一身份，没有独立的数字 id。
/// 同一秒内发送的两条相同内容的消息无法区分，删除时任取一条匹配项。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub content: String,
    /// 格式: `%Y-%m-%d %H:%M:%S`
    pub time: String,
}

impl TextMessage {
    /// 以当前本地时间创建消息
    pub fn now(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// 分块会话创建请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInitRequest {
    pub filename: String,
    pub total_chunks: u64,
}

/// 分块会话创建响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkInitResponse {
    pub session_id: String,
}

/// 分块上传响应，回传已接受的分块序号
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUploadResponse {
    pub index: u64,
}

/// 分块会话完成请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkCompleteRequest {
    pub session_id: String,
    pub filename: String,
}

/// 文本发送请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSendRequest {
    pub content: String,
}

/// 消息删除请求，身份即 `(content, time)` 对
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeleteRequest {
    pub content: String,
    pub time: String,
}

/// 文件删除请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDeleteRequest {
    pub filename: String,
}

/// 登录请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// 认证状态响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<String>,
}

/// 本机可达地址列表
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpListResponse {
    pub ipv4_list: Vec<String>,
    pub ipv6_list: Vec<String>,
}

/// 批量下载请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedDownloadRequest {
    pub selected: Vec<String>,
}

/// 服务端推送事件
///
/// 通过持久 WebSocket 通道下发，所有在线客户端收到相同事件序列。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// 需要先登录，连接即将关闭
    AuthRequired,
    /// 连接就绪，客户端应随即发送 `pull_state`
    Connected,
    /// 权威文件列表快照
    FileList { files: Vec<FileRecord> },
    /// 权威消息列表快照
    MessageList { messages: Vec<TextMessage> },
    /// 新消息
    NewMessage { message: TextMessage },
    /// 消息已删除
    MessageDeleted { content: String, time: String },
    /// 文件上传完成 (简单或分块路径)
    FileUploaded { file: FileRecord },
    /// 文件已删除
    FileDeleted { filename: String },
}

/// 客户端经推送通道发出的请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// 请求权威状态快照 (连接建立后的主动拉取)
    PullState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0), 0);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(CHUNK_SIZE), 1);
        assert_eq!(chunk_count(CHUNK_SIZE + 1), 2);
        // 25 MiB -> 3 块
        assert_eq!(chunk_count(25 * 1024 * 1024), 3);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_push_event_tag() {
        let event = PushEvent::FileUploaded {
            file: FileRecord {
                name: "a.txt".to_string(),
                size: 3,
                mtime: 1700000000,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"file_uploaded\""));

        let parsed: PushEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_init_request_camel_case() {
        let req = ChunkInitRequest {
            filename: "big.bin".to_string(),
            total_chunks: 3,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"totalChunks\":3"));
        assert!(!json.contains("total_chunks"));
    }

    #[test]
    fn test_pull_state_wire_format() {
        let json = serde_json::to_string(&ClientRequest::PullState).unwrap();
        assert_eq!(json, "{\"type\":\"pull_state\"}");
    }

    #[test]
    fn test_message_time_format() {
        let msg = TextMessage::now("hello");
        // 2024-01-01 00:00:00 样式，长度固定 19
        assert_eq!(msg.time.len(), 19);
        assert_eq!(&msg.time[4..5], "-");
        assert_eq!(&msg.time[13..14], ":");
    }
}
