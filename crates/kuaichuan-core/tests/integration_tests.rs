//! 集成测试 - 分块协议与状态同步
//!
//! 验证会话仓库的装配语义与视图模型在推送事件下的收敛性。

use kuaichuan_core::client::ViewStore;
use kuaichuan_core::protocol::{FileRecord, PushEvent, TextMessage, chunk_count};
use kuaichuan_core::server::UploadRegistry;
use tempfile::TempDir;

/// 25 MiB 文件按 10 MiB 分块得到 3 块; 第 1 块失败一次后重发，
/// 装配结果与各块字节总和一致
#[tokio::test]
async fn test_chunked_upload_with_retry_scenario() {
    let dir = TempDir::new().unwrap();
    let registry = UploadRegistry::new(dir.path());

    // 与 25 MiB/10 MiB 场景同构，用小负载代表各块
    let chunks: [&[u8]; 3] = [&[b'a'; 10], &[b'b'; 10], &[b'c'; 5]];
    assert_eq!(chunk_count(25 * 1024 * 1024), 3);

    let session = registry.init("large.bin", 3).await.unwrap();

    registry.chunk(&session, 0, chunks[0]).await.unwrap();
    // 第 1 块传输失败后重试: 同一序号送达两次
    registry.chunk(&session, 1, chunks[1]).await.unwrap();
    registry.chunk(&session, 1, chunks[1]).await.unwrap();
    registry.chunk(&session, 2, chunks[2]).await.unwrap();

    let record = registry.complete(&session, "large.bin").await.unwrap();
    assert_eq!(record.size, 25);

    let assembled = std::fs::read(dir.path().join(&record.name)).unwrap();
    let expected: Vec<u8> = chunks.concat();
    assert_eq!(assembled, expected);
}

/// 完成后的推送事件在上传方自己的视图里只产生一条记录
#[tokio::test]
async fn test_uploader_receives_own_push_once() {
    let dir = TempDir::new().unwrap();
    let registry = UploadRegistry::new(dir.path());

    let session = registry.init("photo.jpg", 1).await.unwrap();
    registry.chunk(&session, 0, b"jpeg-bytes").await.unwrap();
    let record = registry.complete(&session, "photo.jpg").await.unwrap();

    let mut store = ViewStore::new();
    // 上传方先乐观插入，随后又收到服务端的同名推送
    store.insert_file(record.clone());
    store.insert_file(record.clone());
    assert_eq!(store.files().len(), 1);
    assert_eq!(store.files()[0].name, "photo.jpg");
}

/// 两个客户端以不同顺序应用同一批事件后收敛到相同状态
#[test]
fn test_clients_converge_under_event_reordering() {
    let uploaded = PushEvent::FileUploaded {
        file: FileRecord {
            name: "doc.pdf".to_string(),
            size: 100,
            mtime: 10,
        },
    };
    let message = PushEvent::NewMessage {
        message: TextMessage {
            content: "hello".to_string(),
            time: "2024-06-01 12:00:00".to_string(),
        },
    };

    let apply = |store: &mut ViewStore, event: &PushEvent| match event.clone() {
        PushEvent::FileUploaded { file } => {
            store.insert_file(file);
        }
        PushEvent::NewMessage { message } => store.push_message(message),
        _ => unreachable!(),
    };

    let mut a = ViewStore::new();
    let mut b = ViewStore::new();

    // a 按正序、b 收到文件事件重复且顺序颠倒
    apply(&mut a, &uploaded);
    apply(&mut a, &message);
    apply(&mut b, &message);
    apply(&mut b, &uploaded);
    apply(&mut b, &uploaded);

    assert_eq!(a.files(), b.files());
    assert_eq!(a.message_count(), b.message_count());
}

/// 删除已勾选文件的事件让文件列表与勾选集原子地一起收敛
#[test]
fn test_file_deleted_event_prunes_selection() {
    let mut store = ViewStore::new();
    store.insert_file(FileRecord {
        name: "keep.txt".to_string(),
        size: 1,
        mtime: 1,
    });
    store.insert_file(FileRecord {
        name: "gone.txt".to_string(),
        size: 1,
        mtime: 2,
    });
    store.select("keep.txt");
    store.select("gone.txt");

    store.remove_file("gone.txt");

    assert_eq!(store.files().len(), 1);
    assert_eq!(store.selection().len(), 1);
    assert!(store.selection().contains("keep.txt"));
}

/// 推送事件的 JSON 形态在客户端与服务端之间往返无损
#[test]
fn test_push_event_wire_compatibility() {
    let events = vec![
        PushEvent::AuthRequired,
        PushEvent::Connected,
        PushEvent::FileUploaded {
            file: FileRecord {
                name: "a.bin".to_string(),
                size: 7,
                mtime: 1700000000,
            },
        },
        PushEvent::FileDeleted {
            filename: "a.bin".to_string(),
        },
        PushEvent::MessageDeleted {
            content: "hi".to_string(),
            time: "2024-06-01 12:00:00".to_string(),
        },
    ];

    for event in events {
        let json = serde_json::to_string(&event).unwrap();
        let parsed: PushEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}

/// 弃置会话回收后，迟到的分块被当作未知会话拒绝
#[tokio::test]
async fn test_late_chunk_after_reap_rejected() {
    let dir = TempDir::new().unwrap();
    let registry = UploadRegistry::new(dir.path());

    let session = registry.init("slow.bin", 2).await.unwrap();
    registry.chunk(&session, 0, b"first").await.unwrap();

    registry.reap_expired(std::time::Duration::ZERO).await;

    let err = registry.chunk(&session, 1, b"late").await.unwrap_err();
    assert!(matches!(
        err,
        kuaichuan_core::RegistryError::UnknownSession(_)
    ));
}
