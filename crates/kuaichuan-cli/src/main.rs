//! Kuaichuan CLI
//!
//! 命令行客户端，通过 HTTP/WebSocket 访问快传服务

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kuaichuan_core::client::{
    ApiClient, SyncCallback, SyncOutcome, SyncSession, SyncState, UploadProgressCallback, Uploader,
    ViewStore,
};
use kuaichuan_core::protocol::format_size;

#[derive(Parser)]
#[command(name = "kuaichuan", version, about = "局域网文件快传 - 命令行客户端")]
struct Cli {
    /// 服务地址
    #[arg(short, long, default_value = "http://127.0.0.1:5000")]
    server: String,

    /// 访问口令 (服务端启用口令时需要)
    #[arg(short, long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 上传文件 (超过 10 MiB 自动走分块路径)
    Upload {
        /// 要上传的文件路径
        files: Vec<PathBuf>,
    },
    /// 发送文本消息
    Text {
        /// 消息内容
        content: String,
    },
    /// 查看文件列表
    List,
    /// 查看消息列表
    Messages,
    /// 查看服务端可达地址
    Ips,
    /// 批量下载文件 (打包为 ZIP)
    Download {
        /// 要下载的文件名
        names: Vec<String>,
        /// 保存目录 (默认: ~/Downloads)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 删除文件
    Delete {
        /// 文件名
        filename: String,
    },
    /// 删除消息 (身份为内容 + 时间)
    DeleteMessage {
        /// 消息内容
        content: String,
        /// 消息时间 (格式 2024-06-01 12:00:00)
        time: String,
    },
    /// 实时同步模式，持续打印服务端状态变化
    Watch,
}

/// 终端打印回调
struct PrintCallback;

impl UploadProgressCallback for PrintCallback {
    fn on_status(&self, status: &str) {
        println!("   {}", status);
    }

    fn on_progress(&self, percent: u8) {
        println!("   进度: {}%", percent);
    }

    fn on_file_complete(&self, filename: &str) {
        println!("✅ {}", filename);
    }

    fn on_file_failed(&self, filename: &str, error: &str) {
        eprintln!("❌ {}: {}", filename, error);
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize) {
        println!("📦 批次结束: {} 成功, {} 失败", succeeded, failed);
    }

    fn on_idle(&self) {}
}

impl SyncCallback for PrintCallback {
    fn on_state(&self, state: SyncState) {
        println!("🔄 连接状态: {:?}", state);
    }

    fn on_change(&self, store: &ViewStore) {
        println!(
            "   文件 {} 个, 消息 {} 条",
            store.files().len(),
            store.message_count()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let api = ApiClient::new(&cli.server)?;
    if let Some(password) = &cli.password {
        if !api.login(password).await? {
            bail!("口令错误");
        }
    }

    match cli.command {
        Commands::Upload { files } => {
            if files.is_empty() {
                bail!("请指定要上传的文件");
            }
            println!("📤 上传 {} 个文件到 {}", files.len(), cli.server);
            let mut uploader = Uploader::new(&api);
            uploader.queue(files);
            let report = uploader.run(&PrintCallback).await;
            if report.auth_aborted {
                bail!("认证失效，批次中止，请重新登录");
            }
            if report.failed > 0 {
                bail!("{} 个文件上传失败", report.failed);
            }
        }
        Commands::Text { content } => {
            api.send_text(&content).await?;
            println!("✅ 消息已发送");
        }
        Commands::List => {
            let files = api.fetch_files().await?;
            if files.is_empty() {
                println!("   暂无文件");
            }
            for f in files {
                println!("   {}  ({})", f.name, format_size(f.size));
            }
        }
        Commands::Messages => {
            let messages = api.fetch_messages().await?;
            if messages.is_empty() {
                println!("   暂无消息");
            }
            for m in messages {
                println!("   [{}] {}", m.time, m.content);
            }
        }
        Commands::Ips => {
            let ips = api.fetch_ips().await?;
            for ip in &ips.ipv4_list {
                println!("   {}", ip);
            }
            for ip in &ips.ipv6_list {
                println!("   [{}]", ip);
            }
        }
        Commands::Download { names, output } => {
            let dir = output
                .or_else(dirs::download_dir)
                .unwrap_or_else(|| PathBuf::from("."));
            let data = api.download_selected(&names).await?;
            tokio::fs::create_dir_all(&dir).await?;
            let dest = dir.join("selected_files.zip");
            tokio::fs::write(&dest, &data).await?;
            println!("📥 已保存到 {}", dest.display());
        }
        Commands::Delete { filename } => {
            api.delete_file(&filename).await?;
            println!("🗑️  已删除 {}", filename);
        }
        Commands::DeleteMessage { content, time } => {
            api.delete_message(&content, &time).await?;
            println!("🗑️  已删除消息");
        }
        Commands::Watch => {
            let mut store = ViewStore::new();
            loop {
                let mut session = SyncSession::connect(&api).await?;
                match session.run(&mut store, &PrintCallback).await? {
                    SyncOutcome::AuthRequired => {
                        let Some(password) = &cli.password else {
                            bail!("服务端要求口令，请用 --password 提供");
                        };
                        if !api.login(password).await? {
                            bail!("口令错误");
                        }
                        // 登录成功后重新进入连接状态机
                        continue;
                    }
                    SyncOutcome::Closed => {
                        println!("🔌 连接已关闭");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
