//! 上传目录存储
//!
//! 文件落盘、重名规避、目录扫描与路径安全检查。

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::protocol::FileRecord;

/// 为落盘文件选择不冲突的目标路径
///
/// 已存在同名文件时依次尝试 `name(1).ext`、`name(2).ext`…
/// 返回 (路径, 最终文件名)。
pub async fn unique_destination(dir: &Path, filename: &str) -> std::io::Result<(PathBuf, String)> {
    let mut candidate = filename.to_string();
    let mut counter = 1u32;

    let (stem, ext) = split_name(filename);
    loop {
        let path = dir.join(&candidate);
        if !tokio::fs::try_exists(&path).await? {
            return Ok((path, candidate));
        }
        candidate = format!("{}({}){}", stem, counter, ext);
        counter += 1;
    }
}

/// 拆分文件名为 (主干, 含点扩展名)
fn split_name(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        // 隐藏文件 (".bashrc") 不视为扩展名
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    }
}

/// 扫描上传目录，按 mtime 倒序返回文件记录
///
/// 跳过子目录 (包括分块暂存目录)。
pub async fn scan_files(dir: &Path) -> std::io::Result<Vec<FileRecord>> {
    let mut records = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        records.push(FileRecord {
            name: entry.file_name().to_string_lossy().to_string(),
            size: meta.len(),
            mtime,
        });
    }
    records.sort_by(|a, b| b.mtime.cmp(&a.mtime).then_with(|| a.name.cmp(&b.name)));
    Ok(records)
}

/// 归一化客户端提供的文件名
///
/// 浏览器可能携带完整路径; 只保留最后一段，空名与点目录拒绝。
pub fn sanitize_name(filename: &str) -> Option<String> {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

/// 解析请求的文件名为上传目录内的安全路径
///
/// 拒绝路径分隔符与 `..`，防止目录穿越。
pub fn resolve_safe(dir: &Path, filename: &str) -> Option<PathBuf> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename == "."
        || filename == ".."
    {
        return None;
    }
    Some(dir.join(filename))
}
