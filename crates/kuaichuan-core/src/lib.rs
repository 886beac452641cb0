//! Kuaichuan Core Library
//!
//! 局域网文件快传与文本剪贴板服务的核心实现库
//!
//! # 模块
//!
//! - **protocol**: HTTP/WebSocket 线上类型与协议常量
//! - **client**: HTTP 传输客户端、分块上传控制器、实时状态同步器
//! - **server**: 分块会话仓库、权威状态、路由与推送通道
//! - **config**: 应用设置的存储和读取
//! - **error**: 客户端/服务端错误分类
//!
//! # 使用示例
//!
//! ## 上传文件
//!
//! ```ignore
//! use kuaichuan_core::client::{ApiClient, SimpleUploadCallback, Uploader};
//!
//! let api = ApiClient::new("http://192.168.1.5:5000")?;
//! let (callback, mut events) = SimpleUploadCallback::new();
//!
//! let mut uploader = Uploader::new(&api);
//! uploader.queue([PathBuf::from("big-file.iso")]);
//! let report = uploader.run(&callback).await;
//! ```
//!
//! ## 实时同步
//!
//! ```ignore
//! use kuaichuan_core::client::{ApiClient, NoopSyncCallback, SyncSession, ViewStore};
//!
//! let api = ApiClient::new("http://192.168.1.5:5000")?;
//! let mut store = ViewStore::new();
//! let mut session = SyncSession::connect(&api).await?;
//! session.run(&mut store, &NoopSyncCallback).await?;
//! ```
//!
//! ## 启动服务端
//!
//! ```ignore
//! use kuaichuan_core::{AppSettings, server};
//!
//! let settings = AppSettings::load();
//! let state = Arc::new(server::ServerState::new(&settings));
//! let app = server::router(state);
//! axum::serve(listener, app).await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

// Client re-exports
pub use client::{
    ApiClient, BatchReport, SimpleUploadCallback, SyncOutcome, SyncSession, SyncState,
    UploadEvent, UploadOptions, UploadProgressCallback, Uploader, ViewStore,
};

// Server re-exports
pub use server::{ServerState, UploadRegistry, router};

// Config / error re-exports
pub use config::AppSettings;
pub use error::{RegistryError, ShareError};

// Protocol re-exports
pub use protocol::{
    CHUNK_SIZE, FileRecord, MESSAGE_RETENTION, PushEvent, SIMPLE_THRESHOLD, TextMessage,
};
