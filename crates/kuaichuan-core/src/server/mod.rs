//! 服务端协议栈
//!
//! 包含:
//! - 分块上传会话仓库与装配
//! - 权威状态与推送广播
//! - HTTP 路由与 WebSocket 推送通道
//! - 上传目录存储与本机地址枚举

pub mod netinfo;
pub mod registry;
pub mod routes;
pub mod state;
pub mod storage;
pub mod ws;

pub use registry::UploadRegistry;
pub use routes::router;
pub use state::ServerState;
