use anyhow::Result;
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Kuaichuan 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建所有组件 (release)
    Build,
    /// 运行服务端 (开发模式)
    Dev,
    /// 安装 systemd 服务
    Install,
    /// 卸载 systemd 服务
    Uninstall,
    /// 打包发布 (tar.gz)
    Dist,
    /// 运行测试
    Test,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = std::env::var("CARGO_MANIFEST_DIR")
        .map(std::path::PathBuf::from)
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| std::env::current_dir().unwrap());
    sh.change_dir(&project_root);

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Dev => dev(&sh)?,
        Commands::Install => install(&sh)?,
        Commands::Uninstall => uninstall(&sh)?,
        Commands::Dist => dist(&sh)?,
        Commands::Test => test(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建所有组件...");
    cmd!(
        sh,
        "cargo build --release -p kuaichuan-server -p kuaichuan-cli"
    )
    .run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn dev(sh: &Shell) -> Result<()> {
    println!("🚀 启动开发模式服务端...");
    cmd!(sh, "cargo run -p kuaichuan-server").run()?;
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📦 安装 Kuaichuan 服务...");

    build(sh)?;

    // 先停止已运行的服务（如果存在）
    println!("⏹️  停止现有服务...");
    let _ = cmd!(sh, "sudo systemctl stop kuaichuan.service").run();
    std::thread::sleep(std::time::Duration::from_millis(500));

    println!("📋 复制二进制文件...");
    cmd!(
        sh,
        "sudo cp target/release/kuaichuan-server /usr/local/bin/"
    )
    .run()?;
    cmd!(
        sh,
        "sudo cp target/release/kuaichuan-cli /usr/local/bin/kuaichuan"
    )
    .run()?;

    cmd!(sh, "sudo cp assets/kuaichuan.service /etc/systemd/system/").run()?;

    cmd!(sh, "sudo systemctl daemon-reload").run()?;
    cmd!(sh, "sudo systemctl enable --now kuaichuan.service").run()?;

    println!("✅ 服务安装完成");
    println!("   使用 'kuaichuan --help' 查看命令");
    println!("   使用 'systemctl status kuaichuan' 查看服务状态");
    Ok(())
}

fn uninstall(sh: &Shell) -> Result<()> {
    println!("🗑️  卸载 Kuaichuan 服务...");

    let _ = cmd!(sh, "sudo systemctl stop kuaichuan.service").run();
    let _ = cmd!(sh, "sudo systemctl disable kuaichuan.service").run();

    let _ = cmd!(sh, "sudo rm /etc/systemd/system/kuaichuan.service").run();
    let _ = cmd!(sh, "sudo rm /usr/local/bin/kuaichuan-server").run();
    let _ = cmd!(sh, "sudo rm /usr/local/bin/kuaichuan").run();

    cmd!(sh, "sudo systemctl daemon-reload").run()?;

    println!("✅ 卸载完成");
    Ok(())
}

fn dist(sh: &Shell) -> Result<()> {
    println!("📦 打包发布...");

    build(sh)?;

    sh.create_dir("dist")?;
    cmd!(
        sh,
        "tar czf dist/kuaichuan.tar.gz -C target/release kuaichuan-server kuaichuan-cli"
    )
    .run()?;

    println!("✅ 已生成 dist/kuaichuan.tar.gz");
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("🧪 运行测试...");
    cmd!(sh, "cargo test --workspace").run()?;
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    let _ = sh.remove_path("dist");
    Ok(())
}
