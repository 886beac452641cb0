//! 分块上传控制器
//!
//! 按文件顺序处理上传批次:
//! 1. 不超过阈值的文件走简单路径，一次请求完成，失败不重试
//! 2. 大文件走分块路径: init -> 逐块 upload -> complete
//! 3. 分块失败按固定退避重试同一序号，序号计数器不会越过失败的块
//!
//! 文件之间与块之间都是严格串行的，同一时刻至多持有一个分块缓冲，
//! 进度汇报随完成文件数单调递增。

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::client::transport::ApiClient;
use crate::error::ShareError;
use crate::protocol::{CHUNK_SIZE, SIMPLE_THRESHOLD, chunk_count, format_size};

/// 上传策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    /// 单请求整体上传
    Simple,
    /// init/upload/complete 分块序列
    Chunked,
}

/// 上传任务状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InFlight,
    Retrying,
    Completed,
    Failed(String),
}

/// 一个用户选定的待传文件
///
/// 由控制器独占持有，到达终态并汇报后即销毁。
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub filename: String,
    pub size_bytes: u64,
    pub strategy: UploadStrategy,
    pub status: TaskStatus,
}

/// 单个分块的描述
///
/// 会话 id 由服务端签发; `attempt` 随重试递增。
#[derive(Debug, Clone)]
struct ChunkDescriptor {
    session_id: String,
    index: u64,
    offset: u64,
    len: u64,
    attempt: u32,
}

/// 按序号重试的显式状态
///
/// 以状态迁移代替循环计数器回退: `Attempting -> Acked` 或退避后
/// `Attempting(attempt + 1)`，重试耗尽进入 `Exhausted`。
enum ChunkState {
    Attempting,
    Acked,
    Exhausted(ShareError),
}

/// 上传进度回调
pub trait UploadProgressCallback: Send + Sync {
    /// 状态更新
    fn on_status(&self, status: &str);
    /// 整批进度 (完成文件数 / 总文件数，取整百分比)
    fn on_progress(&self, percent: u8);
    /// 单个文件完成
    fn on_file_complete(&self, filename: &str);
    /// 单个文件失败
    fn on_file_failed(&self, filename: &str, error: &str);
    /// 整批结束
    fn on_batch_complete(&self, succeeded: usize, failed: usize);
    /// 结束展示延迟后归于空闲
    fn on_idle(&self);
}

/// 上传选项
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// 单块最大重试次数，耗尽后该文件失败
    pub max_chunk_retries: u32,
    /// 分块重试的固定退避间隔
    pub retry_backoff: Duration,
    /// 批次结束后到空闲通知的展示延迟
    pub idle_delay: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_chunk_retries: 60,
            retry_backoff: Duration::from_secs(1),
            idle_delay: Duration::from_secs(2),
        }
    }
}

/// 批次结果
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 收到 401 中止，剩余文件未尝试
    pub auth_aborted: bool,
}

/// 根据文件大小选择策略 (阈值含边界，等于阈值走简单路径)
pub fn strategy_for(size_bytes: u64) -> UploadStrategy {
    if size_bytes <= SIMPLE_THRESHOLD {
        UploadStrategy::Simple
    } else {
        UploadStrategy::Chunked
    }
}

/// 计算每个分块的 (偏移, 长度)
pub fn plan_chunks(size_bytes: u64) -> Vec<(u64, u64)> {
    let total = chunk_count(size_bytes);
    (0..total)
        .map(|i| {
            let offset = i * CHUNK_SIZE;
            let len = CHUNK_SIZE.min(size_bytes - offset);
            (offset, len)
        })
        .collect()
}

fn batch_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done as f64 / total as f64) * 100.0).round() as u8
}

/// 分块上传控制器
///
/// 不去重同名文件的并发重提交 —— 依赖服务端会话 id 的唯一性避免
/// 串扰。调用方自行避免同一控制器的并发调用。
pub struct Uploader<'a> {
    api: &'a ApiClient,
    options: UploadOptions,
    pending: Vec<PathBuf>,
}

impl<'a> Uploader<'a> {
    pub fn new(api: &'a ApiClient) -> Self {
        Self::with_options(api, UploadOptions::default())
    }

    pub fn with_options(api: &'a ApiClient, options: UploadOptions) -> Self {
        Self {
            api,
            options,
            pending: Vec::new(),
        }
    }

    /// 追加待传文件
    pub fn queue(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.pending.extend(paths);
    }

    pub fn pending(&self) -> &[PathBuf] {
        &self.pending
    }

    /// 顺序处理整个批次
    ///
    /// 单个文件失败不影响后续文件; 401 是全局信号，立即中止剩余
    /// 批次。结束后清空待传列表，延迟后发出空闲通知。
    pub async fn run<C: UploadProgressCallback>(&mut self, callback: &C) -> BatchReport {
        let batch: Vec<PathBuf> = std::mem::take(&mut self.pending);
        if batch.is_empty() {
            return BatchReport::default();
        }

        let mut report = BatchReport {
            total: batch.len(),
            ..Default::default()
        };

        for (i, path) in batch.iter().enumerate() {
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string());

            callback.on_status(&format!("正在上传 {} ({}/{})", filename, i + 1, report.total));

            match self.upload_one(path, &filename, callback).await {
                Ok(()) => {
                    report.succeeded += 1;
                    callback.on_file_complete(&filename);
                }
                Err(e) => {
                    report.failed += 1;
                    callback.on_file_failed(&filename, &e.to_string());
                    if matches!(e, ShareError::Auth) {
                        warn!("Batch aborted after 401 ({} files remaining)", report.total - i - 1);
                        report.auth_aborted = true;
                        break;
                    }
                }
            }

            let done = report.succeeded + report.failed;
            callback.on_progress(batch_percent(done, report.total));
        }

        callback.on_status(&format!(
            "上传完成: {} 成功, {} 失败",
            report.succeeded, report.failed
        ));
        callback.on_batch_complete(report.succeeded, report.failed);

        tokio::time::sleep(self.options.idle_delay).await;
        callback.on_idle();

        report
    }

    /// 上传单个文件
    async fn upload_one<C: UploadProgressCallback>(
        &self,
        path: &Path,
        filename: &str,
        callback: &C,
    ) -> Result<(), ShareError> {
        let size_bytes = tokio::fs::metadata(path)
            .await
            .map_err(|e| ShareError::UserInput(format!("cannot stat {}: {}", path.display(), e)))?
            .len();

        let mut task = UploadTask {
            filename: filename.to_string(),
            size_bytes,
            strategy: strategy_for(size_bytes),
            status: TaskStatus::InFlight,
        };

        debug!(
            "uploading {} ({}, {:?})",
            filename,
            format_size(size_bytes),
            task.strategy
        );

        let result = match task.strategy {
            UploadStrategy::Simple => self.upload_simple(path, filename).await,
            UploadStrategy::Chunked => {
                self.upload_chunked(path, filename, size_bytes, &mut task, callback)
                    .await
            }
        };

        task.status = match &result {
            Ok(()) => TaskStatus::Completed,
            Err(e) => TaskStatus::Failed(e.to_string()),
        };
        result
    }

    /// 简单路径: 一次请求，失败不重试，调用方可整体重提
    async fn upload_simple(&self, path: &Path, filename: &str) -> Result<(), ShareError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ShareError::UserInput(format!("cannot read {}: {}", path.display(), e)))?;
        self.api.simple_upload(filename, bytes).await
    }

    /// 分块路径
    ///
    /// init 失败直接中止该文件，无需清理; complete 失败对该文件是
    /// 终止性的，已装配未提交的分块由服务端会话回收负责。
    async fn upload_chunked<C: UploadProgressCallback>(
        &self,
        path: &Path,
        filename: &str,
        size_bytes: u64,
        task: &mut UploadTask,
        callback: &C,
    ) -> Result<(), ShareError> {
        let chunks = plan_chunks(size_bytes);
        let total_chunks = chunks.len() as u64;

        let session_id = self.api.chunk_init(filename, total_chunks).await?;

        let mut file = File::open(path)
            .await
            .map_err(|e| ShareError::UserInput(format!("cannot open {}: {}", path.display(), e)))?;

        for (index, (offset, len)) in chunks.into_iter().enumerate() {
            // 顺序读取，同一时刻只有这一个分块缓冲存活
            let mut buf = vec![0u8; len as usize];
            file.read_exact(&mut buf).await.map_err(|e| {
                ShareError::UserInput(format!("cannot read {}: {}", path.display(), e))
            })?;

            let mut desc = ChunkDescriptor {
                session_id: session_id.clone(),
                index: index as u64,
                offset,
                len,
                attempt: 0,
            };

            self.send_chunk(&mut desc, &buf, task, callback, total_chunks)
                .await?;
        }

        self.api.chunk_complete(&session_id, filename).await
    }

    /// 发送一个分块，按显式状态机重试同一序号
    async fn send_chunk<C: UploadProgressCallback>(
        &self,
        desc: &mut ChunkDescriptor,
        bytes: &[u8],
        task: &mut UploadTask,
        callback: &C,
        total_chunks: u64,
    ) -> Result<(), ShareError> {
        let mut state = ChunkState::Attempting;

        loop {
            match state {
                ChunkState::Attempting => {
                    desc.attempt += 1;
                    let result = self
                        .api
                        .chunk_upload(&desc.session_id, desc.index, bytes.to_vec())
                        .await;

                    state = match result {
                        Ok(acked) => {
                            debug_assert_eq!(acked, desc.index);
                            ChunkState::Acked
                        }
                        Err(e) if e.is_chunk_retryable()
                            && desc.attempt <= self.options.max_chunk_retries =>
                        {
                            warn!(
                                "chunk {}/{} of session {} failed (attempt {}): {}, retrying",
                                desc.index, total_chunks, desc.session_id, desc.attempt, e
                            );
                            task.status = TaskStatus::Retrying;
                            callback.on_status(&format!(
                                "{} 第 {} 块重试中 (第 {} 次)",
                                task.filename,
                                desc.index + 1,
                                desc.attempt
                            ));
                            tokio::time::sleep(self.options.retry_backoff).await;
                            ChunkState::Attempting
                        }
                        Err(e) => ChunkState::Exhausted(e),
                    };
                }
                ChunkState::Acked => {
                    task.status = TaskStatus::InFlight;
                    debug!(
                        "chunk {} acked (offset={}, len={})",
                        desc.index, desc.offset, desc.len
                    );
                    return Ok(());
                }
                ChunkState::Exhausted(e) => {
                    info!(
                        "giving up on chunk {} of session {} after {} attempts",
                        desc.index, desc.session_id, desc.attempt
                    );
                    return Err(e);
                }
            }
        }
    }
}

/// 基于 mpsc 的简化回调实现
pub struct SimpleUploadCallback {
    tx: mpsc::Sender<UploadEvent>,
}

#[derive(Debug, Clone)]
pub enum UploadEvent {
    Status(String),
    Progress(u8),
    FileComplete(String),
    FileFailed { filename: String, error: String },
    BatchComplete { succeeded: usize, failed: usize },
    Idle,
}

impl SimpleUploadCallback {
    pub fn new() -> (Self, mpsc::Receiver<UploadEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (Self { tx }, rx)
    }
}

impl UploadProgressCallback for SimpleUploadCallback {
    fn on_status(&self, status: &str) {
        let _ = self.tx.try_send(UploadEvent::Status(status.to_string()));
    }

    fn on_progress(&self, percent: u8) {
        let _ = self.tx.try_send(UploadEvent::Progress(percent));
    }

    fn on_file_complete(&self, filename: &str) {
        let _ = self
            .tx
            .try_send(UploadEvent::FileComplete(filename.to_string()));
    }

    fn on_file_failed(&self, filename: &str, error: &str) {
        let _ = self.tx.try_send(UploadEvent::FileFailed {
            filename: filename.to_string(),
            error: error.to_string(),
        });
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize) {
        let _ = self
            .tx
            .try_send(UploadEvent::BatchComplete { succeeded, failed });
    }

    fn on_idle(&self) {
        let _ = self.tx.try_send(UploadEvent::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_strategy_boundary_inclusive_to_simple() {
        assert_eq!(strategy_for(0), UploadStrategy::Simple);
        assert_eq!(strategy_for(SIMPLE_THRESHOLD), UploadStrategy::Simple);
        assert_eq!(strategy_for(SIMPLE_THRESHOLD + 1), UploadStrategy::Chunked);
    }

    /// 25 MiB 按 10 MiB 分块 -> 3 块，末块 5 MiB
    #[test]
    fn test_plan_chunks_25_mib() {
        let chunks = plan_chunks(25 * MIB);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], (0, 10 * MIB));
        assert_eq!(chunks[1], (10 * MIB, 10 * MIB));
        assert_eq!(chunks[2], (20 * MIB, 5 * MIB));
        // 各块覆盖整个文件且不重叠
        let total: u64 = chunks.iter().map(|(_, len)| len).sum();
        assert_eq!(total, 25 * MIB);
    }

    #[test]
    fn test_plan_chunks_exact_multiple() {
        let chunks = plan_chunks(20 * MIB);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], (10 * MIB, 10 * MIB));
    }

    #[test]
    fn test_batch_percent() {
        assert_eq!(batch_percent(0, 0), 0);
        assert_eq!(batch_percent(1, 3), 33);
        assert_eq!(batch_percent(2, 3), 67);
        assert_eq!(batch_percent(3, 3), 100);
        // 单文件批次: 1/1 = 100%
        assert_eq!(batch_percent(1, 1), 100);
    }
}
