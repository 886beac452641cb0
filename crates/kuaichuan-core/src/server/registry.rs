//! 分块上传会话仓库
//!
//! 把会话 id 映射到已收到的分块序号集合与目标文件名，完成时按序号
//! 顺序装配成最终文件。分块内容暂存在上传目录下的
//! `.parts/<sessionId>/<index>.part`。
//!
//! # 约束
//!
//! - 装配仅在收到的序号集合恰好等于 `{0..totalChunks}` 时发生，且
//!   恰好一次
//! - 同一序号重复送达是幂等的 (覆盖写)，到达顺序与正确性无关
//! - `complete` 与 `chunk` 经同一把锁串行，同一会话不会边收边装配
//! - 弃置会话 (init 后未 complete) 由 [`UploadRegistry::reap_expired`]
//!   定期回收

use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::protocol::FileRecord;
use crate::server::storage::unique_destination;

/// 一个进行中的分块会话
#[derive(Debug)]
struct UploadSession {
    filename: String,
    total_chunks: u64,
    received: HashSet<u64>,
    part_dir: PathBuf,
    created_at: Instant,
}

/// 分块会话仓库
pub struct UploadRegistry {
    upload_dir: PathBuf,
    parts_root: PathBuf,
    sessions: Mutex<HashMap<String, UploadSession>>,
}

impl UploadRegistry {
    /// 创建仓库，`upload_dir` 是装配完成文件的落盘目录
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        let upload_dir = upload_dir.into();
        let parts_root = upload_dir.join(".parts");
        Self {
            upload_dir,
            parts_root,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// 创建新会话，返回全局唯一的会话 id
    pub async fn init(&self, filename: &str, total_chunks: u64) -> Result<String, RegistryError> {
        if total_chunks == 0 {
            return Err(RegistryError::EmptySession);
        }

        let session_id = Uuid::new_v4().to_string();
        let part_dir = self.parts_root.join(&session_id);
        tokio::fs::create_dir_all(&part_dir).await?;

        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            session_id.clone(),
            UploadSession {
                filename: filename.to_string(),
                total_chunks,
                received: HashSet::new(),
                part_dir,
                created_at: Instant::now(),
            },
        );

        info!(
            "session {} opened: {} ({} chunks)",
            session_id, filename, total_chunks
        );
        Ok(session_id)
    }

    /// 接收一个分块
    ///
    /// 重复序号覆盖写，无额外副作用; 返回已接受的序号。
    pub async fn chunk(
        &self,
        session_id: &str,
        index: u64,
        bytes: &[u8],
    ) -> Result<u64, RegistryError> {
        if bytes.is_empty() {
            return Err(RegistryError::EmptyChunk);
        }

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| RegistryError::UnknownSession(session_id.to_string()))?;

        if index >= session.total_chunks {
            return Err(RegistryError::BadChunkIndex {
                index,
                total: session.total_chunks,
            });
        }

        let part_path = session.part_dir.join(format!("{}.part", index));
        let mut part = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&part_path)
            .await?;
        part.write_all(bytes).await?;
        part.flush().await?;

        session.received.insert(index);
        debug!(
            "session {}: chunk {} stored ({}/{})",
            session_id,
            index,
            session.received.len(),
            session.total_chunks
        );
        Ok(index)
    }

    /// 完成会话: 校验完整性，按序号装配，发布文件记录
    ///
    /// 装配后会话与暂存分块被删除; 集合不完整时会话保留，等待回收。
    pub async fn complete(
        &self,
        session_id: &str,
        filename: &str,
    ) -> Result<FileRecord, RegistryError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| RegistryError::UnknownSession(session_id.to_string()))?;

        // 完整性: [0, totalChunks) 每个序号恰好出现一次
        if session.received.len() as u64 != session.total_chunks
            || !(0..session.total_chunks).all(|i| session.received.contains(&i))
        {
            return Err(RegistryError::Incomplete {
                received: session.received.len(),
                total: session.total_chunks,
            });
        }

        let target_name = if filename.is_empty() {
            session.filename.clone()
        } else {
            filename.to_string()
        };
        let (dest_path, final_name) = unique_destination(&self.upload_dir, &target_name).await?;

        let mut dest = File::create(&dest_path).await?;
        let mut size: u64 = 0;
        for index in 0..session.total_chunks {
            let part_path = session.part_dir.join(format!("{}.part", index));
            let mut part = File::open(&part_path).await?;
            let mut buf = Vec::new();
            part.read_to_end(&mut buf).await?;
            size += buf.len() as u64;
            dest.write_all(&buf).await?;
        }
        dest.flush().await?;

        let part_dir = session.part_dir.clone();
        sessions.remove(session_id);
        drop(sessions);

        if let Err(e) = tokio::fs::remove_dir_all(&part_dir).await {
            warn!("failed to remove part dir {:?}: {}", part_dir, e);
        }

        let mtime = tokio::fs::metadata(&dest_path)
            .await?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        info!(
            "session {} assembled into {} ({} bytes)",
            session_id, final_name, size
        );
        Ok(FileRecord {
            name: final_name,
            size,
            mtime,
        })
    }

    /// 回收超龄的未完成会话，返回回收数量
    pub async fn reap_expired(&self, max_age: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.created_at.elapsed() > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                info!("reaping abandoned session {} ({})", id, session.filename);
                if let Err(e) = tokio::fs::remove_dir_all(&session.part_dir).await {
                    warn!("failed to remove part dir {:?}: {}", session.part_dir, e);
                }
            }
        }
        expired.len()
    }

    /// 当前打开的会话数
    pub async fn open_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> UploadRegistry {
        UploadRegistry::new(dir.path())
    }

    #[tokio::test]
    async fn test_init_rejects_zero_chunks() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        assert!(matches!(
            reg.init("a.bin", 0).await,
            Err(RegistryError::EmptySession)
        ));
    }

    #[tokio::test]
    async fn test_unknown_session_rejected() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        assert!(matches!(
            reg.chunk("nope", 0, b"data").await,
            Err(RegistryError::UnknownSession(_))
        ));
        assert!(matches!(
            reg.complete("nope", "a.bin").await,
            Err(RegistryError::UnknownSession(_))
        ));
    }

    #[tokio::test]
    async fn test_bad_index_and_empty_chunk_rejected() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let id = reg.init("a.bin", 2).await.unwrap();

        assert!(matches!(
            reg.chunk(&id, 2, b"data").await,
            Err(RegistryError::BadChunkIndex { index: 2, total: 2 })
        ));
        assert!(matches!(
            reg.chunk(&id, 0, b"").await,
            Err(RegistryError::EmptyChunk)
        ));
    }

    /// 完整性: 集合缺一个序号时装配必须失败
    #[tokio::test]
    async fn test_incomplete_session_cannot_complete() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let id = reg.init("a.bin", 3).await.unwrap();

        reg.chunk(&id, 0, b"aa").await.unwrap();
        reg.chunk(&id, 2, b"cc").await.unwrap();

        assert!(matches!(
            reg.complete(&id, "a.bin").await,
            Err(RegistryError::Incomplete {
                received: 2,
                total: 3
            })
        ));
        // 失败后会话保留
        assert_eq!(reg.open_sessions().await, 1);
    }

    /// 到达顺序 (2,0,1) 不影响装配结果，序号决定位置
    #[tokio::test]
    async fn test_out_of_order_delivery() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let id = reg.init("a.bin", 3).await.unwrap();

        reg.chunk(&id, 2, b"CC").await.unwrap();
        reg.chunk(&id, 0, b"AA").await.unwrap();
        reg.chunk(&id, 1, b"BB").await.unwrap();

        let record = reg.complete(&id, "a.bin").await.unwrap();
        assert_eq!(record.size, 6);

        let content = std::fs::read(dir.path().join(&record.name)).unwrap();
        assert_eq!(&content, b"AABBCC");
    }

    /// 重复送达同一序号，装配结果与只发一次完全相同
    #[tokio::test]
    async fn test_duplicate_chunk_idempotent() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let id = reg.init("a.bin", 2).await.unwrap();

        assert_eq!(reg.chunk(&id, 0, b"11").await.unwrap(), 0);
        assert_eq!(reg.chunk(&id, 0, b"11").await.unwrap(), 0);
        reg.chunk(&id, 1, b"22").await.unwrap();

        let record = reg.complete(&id, "a.bin").await.unwrap();
        let content = std::fs::read(dir.path().join(&record.name)).unwrap();
        assert_eq!(&content, b"1122");
    }

    /// 装配恰好一次: 完成后会话与暂存目录即被销毁
    #[tokio::test]
    async fn test_complete_destroys_session() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let id = reg.init("a.bin", 1).await.unwrap();
        reg.chunk(&id, 0, b"x").await.unwrap();

        reg.complete(&id, "a.bin").await.unwrap();
        assert_eq!(reg.open_sessions().await, 0);
        assert!(!dir.path().join(".parts").join(&id).exists());
        assert!(matches!(
            reg.complete(&id, "a.bin").await,
            Err(RegistryError::UnknownSession(_))
        ));
    }

    /// 同名文件装配时重命名，不覆盖已有文件
    #[tokio::test]
    async fn test_assembly_collision_rename() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"old").unwrap();

        let reg = registry(&dir);
        let id = reg.init("a.bin", 1).await.unwrap();
        reg.chunk(&id, 0, b"new").await.unwrap();

        let record = reg.complete(&id, "a.bin").await.unwrap();
        assert_eq!(record.name, "a(1).bin");
        assert_eq!(std::fs::read(dir.path().join("a.bin")).unwrap(), b"old");
    }

    /// 两个同名文件的并发会话经唯一 id 互不串扰
    #[tokio::test]
    async fn test_same_name_sessions_do_not_interfere() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let id1 = reg.init("a.bin", 1).await.unwrap();
        let id2 = reg.init("a.bin", 1).await.unwrap();
        assert_ne!(id1, id2);

        reg.chunk(&id1, 0, b"first").await.unwrap();
        reg.chunk(&id2, 0, b"second").await.unwrap();

        let r1 = reg.complete(&id1, "a.bin").await.unwrap();
        let r2 = reg.complete(&id2, "a.bin").await.unwrap();
        assert_ne!(r1.name, r2.name);
    }

    #[tokio::test]
    async fn test_reap_expired() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let id = reg.init("a.bin", 2).await.unwrap();
        reg.chunk(&id, 0, b"x").await.unwrap();

        // max_age 为零，任何会话都立即超龄
        let reaped = reg.reap_expired(Duration::ZERO).await;
        assert_eq!(reaped, 1);
        assert_eq!(reg.open_sessions().await, 0);
        assert!(!dir.path().join(".parts").join(&id).exists());
    }
}
