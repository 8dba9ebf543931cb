use anyhow::{Context, Result};
/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::models::{AccountStatus, Verdict};
use crate::workflow::AccountCtx;

/// 初始化 tracing
///
/// `RUST_LOG` 优先；否则默认 `info`，`verbose` 时为 `debug`。
/// 重复调用（测试中常见）会被忽略。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n账号处理日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)
        .with_context(|| format!("无法写入日志文件: {}", log_file_path))?;
    Ok(())
}

/// 记录批次启动信息
///
/// # 参数
/// - `total`: 账号总数
/// - `worker_count`: 并发窗口数
pub fn log_startup(total: usize, worker_count: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 批次启动 - 多窗口账号处理模式");
    info!("📋 待处理账号: {}", total);
    info!("📊 最大并发数: {}", worker_count);
    info!("{}", "=".repeat(60));
}

/// 记录单个账号的处理结果
pub fn log_account_result(ctx: &AccountCtx, verdict: &Verdict) {
    let icon = match verdict.status {
        AccountStatus::Subscribed | AccountStatus::LinkReady => "✅",
        AccountStatus::Verified => "✓",
        AccountStatus::Ineligible => "⚠️",
        AccountStatus::Error => "❌",
        AccountStatus::Pending => "…",
    };
    match verdict.payload.as_deref() {
        Some(payload) => info!(
            "{} {} {} ({})",
            ctx,
            icon,
            verdict.status.as_str(),
            truncate_text(payload, 80)
        ),
        None => info!("{} {} {}", ctx, icon, verdict.status.as_str()),
    }
}

/// 打印最终统计信息
///
/// # 参数
/// - `by_status`: 各状态的账号数
/// - `skipped`: 跳过的账号数
/// - `persistence_failures`: 写库失败的账号数
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(
    by_status: &[(AccountStatus, usize)],
    skipped: usize,
    persistence_failures: usize,
    log_file_path: &str,
) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    for (status, count) in by_status.iter().filter(|(_, count)| *count > 0) {
        info!("  {:<12} {}", status.as_str(), count);
    }
    info!("⏭️ 跳过: {}", skipped);
    if persistence_failures > 0 {
        info!("❌ 写库失败: {}", persistence_failures);
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
