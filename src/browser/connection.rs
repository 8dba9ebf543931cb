use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

use crate::infrastructure::{CdpPage, JsExecutor, PageHandle};

/// 把 CDP 地址变成可操作的页面
#[async_trait]
pub trait PageConnector: Send + Sync {
    async fn connect(&self, ws_endpoint: &str) -> Result<Arc<dyn PageHandle>>;
}

/// chromiumoxide 连接器
#[derive(Debug, Default, Clone, Copy)]
pub struct CdpConnector;

#[async_trait]
impl PageConnector for CdpConnector {
    async fn connect(&self, ws_endpoint: &str) -> Result<Arc<dyn PageHandle>> {
        let (browser, page, handler_task) = connect_to_browser(ws_endpoint).await?;
        Ok(Arc::new(CdpPage::new(
            JsExecutor::new(page),
            browser,
            handler_task,
        )))
    }
}

/// 连接到窗口的 CDP 端点并取第一个标签页
pub async fn connect_to_browser(
    ws_endpoint: &str,
) -> Result<(Browser, Page, tokio::task::JoinHandle<()>)> {
    info!("正在连接到浏览器: {}", ws_endpoint);

    let (browser, mut handler) = Browser::connect(ws_endpoint).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        e
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    let handler_task = tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 等待浏览器状态同步
    sleep(Duration::from_millis(300)).await;

    let pages = browser.pages().await.context("获取标签页失败")?;
    debug!("获取到 {} 个页面", pages.len());

    let page = match pages.into_iter().next() {
        Some(page) => page,
        None => {
            debug!("窗口没有标签页，创建空白页面");
            browser.new_page("about:blank").await.map_err(|e| {
                error!("创建空白页面失败: {}", e);
                e
            })?
        }
    };

    Ok((browser, page, handler_task))
}
