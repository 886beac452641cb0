//! 客户端视图模型
//!
//! 同步器的写入目标: 文件列表、消息列表、批量下载勾选集。
//! 所有合并操作均幂等，本地发起的变更与推送事件以任意顺序到达
//! 都收敛到同一状态。

use crate::protocol::{FileRecord, MESSAGE_RETENTION, TextMessage};
use std::collections::{HashSet, VecDeque};

/// 视图模型存储
///
/// 不变量: 勾选集中的每个名字都必须存在于文件列表中;
/// 文件删除与勾选清理在同一次变更内完成。
#[derive(Debug, Default)]
pub struct ViewStore {
    /// 最新在前
    files: Vec<FileRecord>,
    /// 最新在前，最多保留 [`MESSAGE_RETENTION`] 条
    messages: VecDeque<TextMessage>,
    selection: HashSet<String>,
}

impl ViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn messages(&self) -> impl Iterator<Item = &TextMessage> {
        self.messages.iter()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn selection(&self) -> &HashSet<String> {
        &self.selection
    }

    /// 用权威快照替换文件列表
    ///
    /// 替换后勾选集里指向已不存在文件的名字被同步清理。
    pub fn replace_files(&mut self, files: Vec<FileRecord>) {
        self.files = files;
        let names: HashSet<&str> = self.files.iter().map(|f| f.name.as_str()).collect();
        self.selection.retain(|n| names.contains(n.as_str()));
    }

    /// 用权威快照替换消息列表，超出保留上限的尾部被丢弃
    pub fn replace_messages(&mut self, messages: Vec<TextMessage>) {
        self.messages = messages.into_iter().take(MESSAGE_RETENTION).collect();
    }

    /// 插入新上传的文件记录
    ///
    /// 仅当列表中不存在同名记录时前插，防止上传方收到自己触发的
    /// 推送后出现重复展示。返回是否发生了变更。
    pub fn insert_file(&mut self, file: FileRecord) -> bool {
        if self.files.iter().any(|f| f.name == file.name) {
            return false;
        }
        self.files.insert(0, file);
        true
    }

    /// 按名字删除文件，并在同一次变更内清理勾选集
    pub fn remove_file(&mut self, name: &str) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f.name != name);
        self.selection.remove(name);
        self.files.len() != before
    }

    /// 前插新消息，超过保留上限时从尾部淘汰最旧的
    pub fn push_message(&mut self, message: TextMessage) {
        self.messages.push_front(message);
        while self.messages.len() > MESSAGE_RETENTION {
            self.messages.pop_back();
        }
    }

    /// 删除第一条 `(content, time)` 完全匹配的消息
    ///
    /// 无匹配时视为已删除，静默成功。
    pub fn remove_message(&mut self, content: &str, time: &str) -> bool {
        if let Some(pos) = self
            .messages
            .iter()
            .position(|m| m.content == content && m.time == time)
        {
            self.messages.remove(pos);
            true
        } else {
            false
        }
    }

    /// 勾选文件，名字必须存在于文件列表中
    pub fn select(&mut self, name: &str) -> bool {
        if self.files.iter().any(|f| f.name == name) {
            self.selection.insert(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn deselect(&mut self, name: &str) {
        self.selection.remove(name);
    }

    pub fn select_all(&mut self) {
        self.selection = self.files.iter().map(|f| f.name.clone()).collect();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> FileRecord {
        FileRecord {
            name: name.to_string(),
            size: 1,
            mtime: 0,
        }
    }

    fn message(content: &str, time: &str) -> TextMessage {
        TextMessage {
            content: content.to_string(),
            time: time.to_string(),
        }
    }

    /// 上传方收到自己的推送事件时文件只出现一次
    #[test]
    fn test_no_duplicate_display() {
        let mut store = ViewStore::new();
        assert!(store.insert_file(record("a.txt")));
        assert!(!store.insert_file(record("a.txt")));
        assert_eq!(store.files().len(), 1);
    }

    #[test]
    fn test_insert_front_ordering() {
        let mut store = ViewStore::new();
        store.insert_file(record("old.txt"));
        store.insert_file(record("new.txt"));
        assert_eq!(store.files()[0].name, "new.txt");
    }

    /// 删除已勾选文件时，文件列表与勾选集在同一次变更中更新
    #[test]
    fn test_selection_pruned_on_delete() {
        let mut store = ViewStore::new();
        store.insert_file(record("a.txt"));
        store.insert_file(record("b.txt"));
        assert!(store.select("a.txt"));
        assert!(store.select("b.txt"));

        store.remove_file("a.txt");
        assert!(!store.selection().contains("a.txt"));
        assert!(store.selection().contains("b.txt"));
    }

    #[test]
    fn test_select_nonexistent_rejected() {
        let mut store = ViewStore::new();
        assert!(!store.select("ghost.txt"));
        assert!(store.selection().is_empty());
    }

    #[test]
    fn test_replace_files_prunes_selection() {
        let mut store = ViewStore::new();
        store.insert_file(record("a.txt"));
        store.select("a.txt");

        store.replace_files(vec![record("b.txt")]);
        assert!(store.selection().is_empty());
    }

    /// 第 101 条消息恰好淘汰最旧的一条
    #[test]
    fn test_message_cap_evicts_oldest() {
        let mut store = ViewStore::new();
        for i in 0..=MESSAGE_RETENTION {
            store.push_message(message(&format!("msg-{}", i), "2024-01-01 00:00:00"));
        }
        assert_eq!(store.message_count(), MESSAGE_RETENTION);
        // 最旧的 msg-0 被淘汰，msg-1 成为尾部
        let oldest = store.messages().last().unwrap();
        assert_eq!(oldest.content, "msg-1");
        let newest = store.messages().next().unwrap();
        assert_eq!(newest.content, format!("msg-{}", MESSAGE_RETENTION));
    }

    /// 删除不存在的消息是无操作，不是错误
    #[test]
    fn test_remove_missing_message_noop() {
        let mut store = ViewStore::new();
        store.push_message(message("hi", "2024-01-01 08:00:00"));
        assert!(!store.remove_message("hi", "2024-01-01 09:00:00"));
        assert_eq!(store.message_count(), 1);
    }

    /// (content, time) 相同的两条消息删除时任取其一
    #[test]
    fn test_remove_message_first_match() {
        let mut store = ViewStore::new();
        store.push_message(message("hi", "2024-01-01 08:00:00"));
        store.push_message(message("hi", "2024-01-01 08:00:00"));
        assert!(store.remove_message("hi", "2024-01-01 08:00:00"));
        assert_eq!(store.message_count(), 1);
    }
}
