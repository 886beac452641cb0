//! HTTP 路由
//!
//! 上传 (简单/分块)、文件与消息查询、删除、批量 ZIP 下载、登录。
//! 推送通道见 [`crate::server::ws`]。

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use log::{error, info, warn};
use serde::Deserialize;
use std::io::Write;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::io::AsyncWriteExt;

use crate::error::RegistryError;
use crate::protocol::{
    AuthResponse, ChunkCompleteRequest, ChunkInitRequest, ChunkInitResponse, ChunkUploadResponse,
    FileDeleteRequest, FileRecord, LoginRequest, MessageDeleteRequest, PushEvent,
    SelectedDownloadRequest, TextSendRequest,
};
use crate::server::state::ServerState;
use crate::server::{netinfo, storage, ws};

/// 请求体上限 (500 MB)
const MAX_BODY_BYTES: usize = 500 * 1024 * 1024;

/// 构建完整路由
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/upload", post(simple_upload))
        .route("/api/chunk/init", post(chunk_init))
        .route("/api/chunk/upload", post(chunk_upload))
        .route("/api/chunk/complete", post(chunk_complete))
        .route("/api/files", get(list_files))
        .route("/api/messages", get(list_messages))
        .route("/api/ips", get(list_ips))
        .route("/api/text", post(send_text))
        .route("/api/message/delete", post(delete_message))
        .route("/api/file/delete", post(delete_file))
        .route("/api/login", post(login))
        .route("/api/auth", get(auth_check))
        .route("/uploads/:filename", get(download_file))
        .route("/download_selected", post(download_selected))
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

/// 口令已配置时所有业务路由要求有效令牌
fn ensure_auth(state: &ServerState, headers: &HeaderMap) -> Result<(), Response> {
    if state.check_token(bearer_token(headers).as_deref()) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "login required").into_response())
    }
}

fn registry_error(e: RegistryError) -> Response {
    let status = match &e {
        RegistryError::UnknownSession(_) => StatusCode::NOT_FOUND,
        RegistryError::BadChunkIndex { .. }
        | RegistryError::EmptyChunk
        | RegistryError::EmptySession => StatusCode::BAD_REQUEST,
        RegistryError::Incomplete { .. } => StatusCode::CONFLICT,
        RegistryError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 简单路径: multipart 整体上传，逐个落盘并广播
async fn simple_upload(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };

        let Some(filename) = field.file_name().and_then(storage::sanitize_name) else {
            continue;
        };
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };

        let (path, final_name) =
            match storage::unique_destination(state.upload_dir(), &filename).await {
                Ok(dest) => dest,
                Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
            };

        let size = bytes.len() as u64;
        let mut file = match tokio::fs::File::create(&path).await {
            Ok(file) => file,
            Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
        };
        if let Err(e) = file.write_all(&bytes).await {
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }

        info!("uploaded {} ({} bytes)", final_name, size);
        state.publish(PushEvent::FileUploaded {
            file: FileRecord {
                name: final_name,
                size,
                mtime: now_secs(),
            },
        });
    }

    StatusCode::NO_CONTENT.into_response()
}

async fn chunk_init(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<ChunkInitRequest>,
) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    let Some(filename) = storage::sanitize_name(&req.filename) else {
        return (StatusCode::BAD_REQUEST, "invalid filename").into_response();
    };
    match state.registry.init(&filename, req.total_chunks).await {
        Ok(session_id) => Json(ChunkInitResponse { session_id }).into_response(),
        Err(e) => registry_error(e),
    }
}

#[derive(Deserialize)]
struct ChunkQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
    index: u64,
}

async fn chunk_upload(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(query): Query<ChunkQuery>,
    body: Bytes,
) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    match state
        .registry
        .chunk(&query.session_id, query.index, &body)
        .await
    {
        Ok(index) => Json(ChunkUploadResponse { index }).into_response(),
        Err(e) => registry_error(e),
    }
}

/// 完成装配并向所有客户端发布文件记录
async fn chunk_complete(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<ChunkCompleteRequest>,
) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    let Some(filename) = storage::sanitize_name(&req.filename) else {
        return (StatusCode::BAD_REQUEST, "invalid filename").into_response();
    };
    match state.registry.complete(&req.session_id, &filename).await {
        Ok(record) => {
            state.publish(PushEvent::FileUploaded {
                file: record.clone(),
            });
            Json(record).into_response()
        }
        Err(e) => {
            warn!("complete failed for session {}: {}", req.session_id, e);
            registry_error(e)
        }
    }
}

async fn list_files(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    match state.files_snapshot().await {
        Ok(files) => Json(files).into_response(),
        Err(e) => {
            error!("failed to scan upload dir: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn list_messages(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    Json(state.messages_snapshot().await).into_response()
}

async fn list_ips(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    Json(netinfo::enumerate()).into_response()
}

/// 空内容与原实现一致按无操作处理
async fn send_text(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<TextSendRequest>,
) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    let content = req.content.trim();
    if !content.is_empty() {
        state.push_message(content).await;
    }
    StatusCode::NO_CONTENT.into_response()
}

/// 无匹配消息时也返回成功 (视为已删除)
async fn delete_message(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<MessageDeleteRequest>,
) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    state.delete_message(&req.content, &req.time).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn delete_file(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<FileDeleteRequest>,
) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    let Some(path) = storage::resolve_safe(state.upload_dir(), &req.filename) else {
        return (StatusCode::FORBIDDEN, "invalid filename").into_response();
    };
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            info!("deleted {}", req.filename);
            state.publish(PushEvent::FileDeleted {
                filename: req.filename,
            });
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "file not found").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn login(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<LoginRequest>,
) -> Response {
    match state.login(&req.password) {
        Some(token) => Json(AuthResponse {
            authenticated: true,
            token: (!token.is_empty()).then_some(token),
        })
        .into_response(),
        None => Json(AuthResponse {
            authenticated: false,
            token: None,
        })
        .into_response(),
    }
}

async fn auth_check(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    Json(AuthResponse {
        authenticated: state.check_token(bearer_token(&headers).as_deref()),
        token: None,
    })
    .into_response()
}

/// 单文件下载，路径安全检查与原实现一致
async fn download_file(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    let Some(path) = storage::resolve_safe(state.upload_dir(), &filename) else {
        return (StatusCode::FORBIDDEN, "invalid filename").into_response();
    };

    match tokio::fs::File::open(&path).await {
        Ok(file) => {
            let mime = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string();
            let disposition = format!("attachment; filename=\"{}\"", filename);
            let stream = tokio_util::io::ReaderStream::new(file);
            (
                [
                    (header::CONTENT_TYPE, mime),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                axum::body::Body::from_stream(stream),
            )
                .into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "file not found").into_response(),
    }
}

/// 批量下载: 勾选文件打包为 ZIP
async fn download_selected(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(req): Json<SelectedDownloadRequest>,
) -> Response {
    if let Err(resp) = ensure_auth(&state, &headers) {
        return resp;
    }
    if req.selected.is_empty() {
        return (StatusCode::BAD_REQUEST, "no files selected").into_response();
    }

    match create_zip(&state, &req.selected).await {
        Ok(data) => (
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"selected_files.zip\"".to_string(),
                ),
            ],
            data,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to create ZIP: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create ZIP").into_response()
        }
    }
}

async fn create_zip(state: &ServerState, selected: &[String]) -> anyhow::Result<Vec<u8>> {
    let mut buffer = Vec::new();

    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buffer));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        for name in selected {
            // 非法或已消失的条目跳过，与原实现一致
            let Some(path) = storage::resolve_safe(state.upload_dir(), name) else {
                continue;
            };
            let Ok(contents) = tokio::fs::read(&path).await else {
                continue;
            };
            zip.start_file(name.as_str(), options)?;
            zip.write_all(&contents)?;
        }

        zip.finish()?;
    }

    Ok(buffer)
}
