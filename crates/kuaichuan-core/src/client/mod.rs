//! 客户端协议栈
//!
//! 包含:
//! - HTTP 传输客户端 (请求/响应式调用)
//! - 分块上传控制器
//! - 实时状态同步器与视图模型

pub mod sync;
pub mod transport;
pub mod uploader;
pub mod view;

pub use sync::{NoopSyncCallback, SyncCallback, SyncOutcome, SyncSession, SyncState};
pub use transport::ApiClient;
pub use uploader::{
    BatchReport, SimpleUploadCallback, UploadEvent, UploadOptions, UploadProgressCallback,
    UploadStrategy, Uploader,
};
pub use view::ViewStore;
