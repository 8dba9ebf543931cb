//! 账号处理流程 - 流程层
//!
//! 核心职责：定义"一个账号"的完整处理流程
//!
//! 流程顺序：
//! 1. 开窗并登录（SessionDriver）
//! 2. 状态分类（Classifier）
//! 3. verified 且启用绑卡 → 租卡 → 绑卡 → 提交 / 归还
//! 4. 关闭窗口

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::CardBindingError;
use crate::infrastructure::PageHandle;
use crate::models::{Account, AccountStatus, Proxy, Verdict};
use crate::orchestrator::card_pool::CardPool;
use crate::services::{CardBinder, Classifier};
use crate::workflow::account_ctx::AccountCtx;
use crate::workflow::session_driver::SessionDriver;

/// 单个账号的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResult {
    pub verdict: Verdict,
    /// 本次使用的窗口 ID（开窗失败时为 `None`）
    pub profile_id: Option<String>,
}

/// 处理单个账号的能力，编排层只依赖这个接口
#[async_trait]
pub trait AccountProcessor: Send + Sync {
    async fn process(&self, account: &Account, proxy: Option<&Proxy>, ctx: &AccountCtx) -> FlowResult;
}

/// 账号处理流程
///
/// - 编排完整的账号处理流程
/// - 任何失败都转换为带原因的 Verdict，不向上抛错
/// - 不持有窗口，会话在流程结束时关闭
pub struct AccountFlow {
    driver: SessionDriver,
    classifier: Classifier,
    binder: CardBinder,
    cards: Arc<CardPool>,
    enable_card_binding: bool,
}

impl AccountFlow {
    pub fn new(
        config: &Config,
        driver: SessionDriver,
        classifier: Classifier,
        cards: Arc<CardPool>,
    ) -> Self {
        Self {
            driver,
            classifier,
            binder: CardBinder::from_config(config),
            cards,
            enable_card_binding: config.enable_card_binding,
        }
    }

    async fn bind_card(&self, page: &dyn PageHandle, ctx: &AccountCtx) -> Verdict {
        let Some(lease) = self.cards.checkout().await else {
            warn!("{} ⚠️ 卡池已空，保持 verified", ctx);
            return Verdict::verified_with_note(CardBindingError::NoCardAvailable.reason());
        };

        info!("{} 💳 开始绑卡 {}", ctx, lease.card().masked());
        match self.binder.bind(page, lease.card()).await {
            Ok(outcome) => {
                if outcome.consumed_card() {
                    if let Err(e) = self.cards.commit(lease).await {
                        error!("{} ❌ 卡片使用记录写入失败: {:#}", ctx, e);
                    }
                } else {
                    self.cards.release(lease).await;
                }
                info!("{} ✓ 绑卡完成 ({:?})", ctx, outcome);
                Verdict::subscribed()
            }
            Err(e) => {
                self.cards.release(lease).await;
                warn!("{} ⚠️ 绑卡失败: {}", ctx, e);
                Verdict::verified_with_note(e.reason())
            }
        }
    }
}

#[async_trait]
impl AccountProcessor for AccountFlow {
    async fn process(&self, account: &Account, proxy: Option<&Proxy>, ctx: &AccountCtx) -> FlowResult {
        match proxy {
            Some(p) => info!("{} 🚀 开始处理 (代理 {})", ctx, p.redacted()),
            None => info!("{} 🚀 开始处理 (直连)", ctx),
        }

        let session = match self.driver.run(account, proxy).await {
            Ok(session) => session,
            Err(e) => {
                warn!("{} ❌ 会话失败: {}", ctx, e);
                return FlowResult {
                    verdict: Verdict::error(e.reason()),
                    profile_id: None,
                };
            }
        };
        let profile_id = session.profile_id().to_string();

        let mut verdict = self.classifier.classify(session.page()).await;
        info!("{} 分类结果: {}", ctx, verdict.status.as_str());

        if verdict.status == AccountStatus::Verified && self.enable_card_binding {
            verdict = self.bind_card(session.page(), ctx).await;
        }

        session.close().await;
        FlowResult {
            verdict,
            profile_id: Some(profile_id),
        }
    }
}
