use std::path::PathBuf;

use account_lifecycle::app::App;
use account_lifecycle::models::AccountStatus;
use account_lifecycle::utils::logging;
use account_lifecycle::Config;
use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

// ── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "account_lifecycle", version, about = "账号生命周期批处理工具")]
struct Cli {
    /// 配置文件（默认读取 lifecycle.toml，不存在则用默认值）
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// 输出 debug 日志
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 导入账号文件（已存在的账号保持不变）
    Import {
        /// 账号文件，默认使用配置中的 accounts_file
        file: Option<PathBuf>,
    },
    /// 处理数据库中的账号
    Run {
        /// 先导入配置中的账号文件
        #[arg(long)]
        import: bool,
        /// 同时启动看板
        #[arg(long)]
        dashboard: bool,
    },
    /// 只启动看板
    Serve {
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,
    },
    /// 从数据库重建全部分类文件
    Sync,
    /// 把旧版分类文件导入数据库
    Migrate {
        /// 分类文件目录，默认使用配置中的 export_dir
        dir: Option<PathBuf>,
    },
    /// 打印当前 2FA 验证码
    Codes,
    /// 把账号重置为 pending
    Reset {
        /// 要重置的邮箱
        emails: Vec<String>,
        /// 重置该状态下的全部账号
        #[arg(long, value_name = "STATUS")]
        status: Option<AccountStatus>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    config.verbose_logging |= cli.verbose;
    logging::init(config.verbose_logging);

    match cli.command {
        Commands::Import { file } => {
            let app = App::initialize(config)?;
            app.import(file.as_deref()).await?;
        }
        Commands::Run { import, dashboard } => {
            let app = App::initialize(config)?;
            if import {
                app.import(None).await?;
            }
            app.run(dashboard).await?;
        }
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.dashboard_port = port;
            }
            App::initialize(config)?.serve().await?;
        }
        Commands::Sync => {
            App::initialize(config)?.sync().await?;
        }
        Commands::Migrate { dir } => {
            App::initialize(config)?.migrate(dir.as_deref()).await?;
        }
        Commands::Codes => {
            for (email, code) in App::initialize(config)?.codes().await? {
                println!("{}----{}", code, email);
            }
        }
        Commands::Reset { emails, status } => {
            if emails.is_empty() && status.is_none() {
                bail!("请指定邮箱或 --status");
            }
            App::initialize(config)?.reset(&emails, status).await?;
        }
    }

    Ok(())
}
