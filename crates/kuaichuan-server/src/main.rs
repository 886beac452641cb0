//! Kuaichuan Server
//!
//! 局域网快传服务端，负责：
//! - 文件上传 (简单/分块) 与下载
//! - 文本消息剪贴板
//! - WebSocket 推送，保持所有客户端视图一致
//! - 弃置分块会话的定期回收

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use kuaichuan_core::config::AppSettings;
use kuaichuan_core::server::{ServerState, netinfo, router};

#[tokio::main]
async fn main() -> Result<()> {
    // 桥接 log crate（kuaichuan-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kuaichuan_core=debug")),
        )
        .try_init();

    let settings = AppSettings::load();
    tokio::fs::create_dir_all(&settings.upload_dir).await?;

    let state = Arc::new(ServerState::new(&settings));
    let app = router(state.clone());

    // 定期回收弃置的分块会话
    let reaper_state = state.clone();
    let max_age = Duration::from_secs(settings.session_max_age_secs);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let reaped = reaper_state.registry.reap_expired(max_age).await;
            if reaped > 0 {
                tracing::info!("reaped {} abandoned upload sessions", reaped);
            }
        }
    });

    // 双栈监听: 优先 ::（同时覆盖 IPv4 映射地址），失败则回退 IPv4
    let listener = match tokio::net::TcpListener::bind(("::", settings.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::warn!("dual-stack bind failed ({}), falling back to IPv4", e);
            tokio::net::TcpListener::bind(("0.0.0.0", settings.port)).await?
        }
    };

    print_banner(&settings);

    axum::serve(listener, app).await?;
    Ok(())
}

/// 启动横幅，列出所有可达的加入链接
fn print_banner(settings: &AppSettings) {
    println!("\n文件快传服务启动中... ({})\n", settings.device_name);

    let ips = netinfo::enumerate();
    println!("可用访问地址:");
    for ip in &ips.ipv4_list {
        println!("  http://{}:{}", ip, settings.port);
    }
    for ip in &ips.ipv6_list {
        println!("  http://[{}]:{}", ip, settings.port);
    }
    if ips.ipv4_list.is_empty() && ips.ipv6_list.is_empty() {
        println!("  http://127.0.0.1:{}", settings.port);
    }

    let upload_dir = std::fs::canonicalize(&settings.upload_dir)
        .unwrap_or_else(|_| settings.upload_dir.clone());
    println!("\n文件保存目录: {}", upload_dir.display());
    if settings.password.is_some() {
        println!("访问口令已启用");
    }
    println!();
}
