//! 绑卡服务 - 业务能力层
//!
//! 对已验证账号：点击领取优惠 → 在 iframe 树里找到支付表单 → 填卡 → 保存 → 订阅。
//! 支付表单嵌在多层 iframe 中，且需要先点"添加卡片"才会出现内层 iframe。

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::keywords::{self, KEYWORDS};
use crate::config::Config;
use crate::error::CardBindingError;
use crate::infrastructure::{frame_tree, FramePath, PageHandle};
use crate::models::Card;

/// 可点击元素
const CLICKABLE: &str = "button, a, [role=\"button\"], [role=\"link\"], [role=\"menuitem\"], li";
/// 卡号输入框
pub const CARD_NUMBER_SELECTOR: &str =
    "input[autocomplete=\"cc-number\"], input[name*=\"card\" i], input[id*=\"card\" i]";
/// 有效期输入框
pub const EXPIRY_SELECTOR: &str =
    "input[autocomplete=\"cc-exp\"], input[name*=\"exp\" i], input[id*=\"exp\" i]";
/// CVV 输入框
pub const CVV_SELECTOR: &str =
    "input[autocomplete=\"cc-csc\"], input[name*=\"cvc\" i], input[name*=\"cvv\" i], input[id*=\"cvc\" i], input[id*=\"cvv\" i]";
const ANY_INPUT: &str = "input";

const ADD_CARD_TEXTS: &[&str] = &["add card", "add credit or debit card", "添加卡", "添加信用卡或借记卡", "agregar tarjeta", "ajouter une carte", "karte hinzufügen"];
const SAVE_TEXTS: &[&str] = &["save card", "save", "保存", "guardar", "enregistrer", "speichern"];
const SUBSCRIBE_TEXTS: &[&str] = &["subscribe", "订阅", "suscribirse", "s'abonner", "abonnieren", "start trial"];
const SUCCESS_MARKERS: &[&str] = &["subscribed", "已订阅", "you're all set", "suscrito", "abonniert"];
const ERROR_MARKERS: &[&str] = &[
    "declined",
    "card was declined",
    "couldn't process",
    "unable to process",
    "invalid card",
    "try another card",
    "an error occurred",
    "your card issuer declined",
    "被拒绝",
    "无法处理",
];

/// 绑卡成功的两种方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// 填卡并订阅，消耗一张卡
    Subscribed,
    /// 账号已绑过卡，直接订阅，不消耗卡
    AlreadyBound,
}

impl BindOutcome {
    pub fn consumed_card(self) -> bool {
        matches!(self, BindOutcome::Subscribed)
    }
}

/// iframe 搜索的结果
#[derive(Debug, Clone, PartialEq, Eq)]
enum PaymentSurface {
    /// 含卡号输入框（或至少 3 个输入框）的文档
    Form(FramePath),
    /// 只有订阅按钮、没有输入框的文档
    SubscribeOnly(FramePath),
}

/// 绑卡器
///
/// 职责：
/// - 在 iframe 树中定位支付表单
/// - 填卡、保存、订阅并等待结果
/// - 不管理卡池，不写库
pub struct CardBinder {
    poll_interval: Duration,
    search_depth: usize,
    search_timeout: Duration,
    result_timeout: Duration,
}

impl CardBinder {
    pub fn new(
        poll_interval: Duration,
        search_depth: usize,
        search_timeout: Duration,
        result_timeout: Duration,
    ) -> Self {
        Self {
            poll_interval,
            search_depth,
            search_timeout,
            result_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.poll_interval(),
            config.frame_search_depth,
            config.frame_search_timeout(),
            config.bind_result_timeout(),
        )
    }

    /// 用 `card` 为当前页面的账号绑卡并订阅
    pub async fn bind(
        &self,
        page: &dyn PageHandle,
        card: &Card,
    ) -> Result<BindOutcome, CardBindingError> {
        self.click_get_offer(page).await?;

        match self.find_payment_surface(page).await? {
            PaymentSurface::SubscribeOnly(frame) => {
                info!("💳 账号已绑卡，直接订阅 (frame {})", frame);
                page.click_text(&frame, CLICKABLE, SUBSCRIBE_TEXTS)
                    .await
                    .map_err(page_err)?;
                self.await_result(page).await?;
                Ok(BindOutcome::AlreadyBound)
            }
            PaymentSurface::Form(frame) => {
                info!("💳 找到支付表单 (frame {})，填写卡片 {}", frame, card.masked());
                self.fill_card(page, &frame, card).await?;
                self.save(page, &frame).await?;
                self.await_result(page).await?;
                Ok(BindOutcome::Subscribed)
            }
        }
    }

    async fn click_get_offer(&self, page: &dyn PageHandle) -> Result<(), CardBindingError> {
        let phrases: Vec<&str> = KEYWORDS
            .values()
            .flat_map(|t| t.verified.iter().copied())
            .collect();
        let clicked = page
            .click_text(&FramePath::root(), CLICKABLE, &phrases)
            .await
            .map_err(page_err)?;
        if clicked {
            debug!("已点击领取优惠按钮");
            sleep(self.poll_interval).await;
        }
        Ok(())
    }

    /// 有时间上限的广度优先搜索；每个提供"添加卡片"的文档只点击一次
    async fn find_payment_surface(
        &self,
        page: &dyn PageHandle,
    ) -> Result<PaymentSurface, CardBindingError> {
        let deadline = Instant::now() + self.search_timeout;
        let mut add_card_clicked: HashSet<FramePath> = HashSet::new();

        loop {
            let frames = frame_tree(page, self.search_depth).await.map_err(page_err)?;
            for info in &frames {
                let frame = &info.path;
                let card_inputs = page.count(frame, CARD_NUMBER_SELECTOR).await.map_err(page_err)?;
                let inputs = page.count(frame, ANY_INPUT).await.map_err(page_err)?;
                if card_inputs > 0 || inputs >= 3 {
                    return Ok(PaymentSurface::Form(frame.clone()));
                }

                if !add_card_clicked.contains(frame)
                    && page
                        .click_text(frame, CLICKABLE, ADD_CARD_TEXTS)
                        .await
                        .map_err(page_err)?
                {
                    debug!("已点击添加卡片 (frame {})", frame);
                    add_card_clicked.insert(frame.clone());
                    continue;
                }

                let offers_subscribe = page
                    .has_text(frame, CLICKABLE, SUBSCRIBE_TEXTS)
                    .await
                    .map_err(page_err)?;
                let offers_add_card = page
                    .has_text(frame, CLICKABLE, ADD_CARD_TEXTS)
                    .await
                    .map_err(page_err)?;
                if inputs == 0 && offers_subscribe && !offers_add_card && frame.depth() > 0 {
                    return Ok(PaymentSurface::SubscribeOnly(frame.clone()));
                }
            }

            if Instant::now() >= deadline {
                warn!("⚠️ 在 {} 个文档中未找到支付表单", frames.len());
                return Err(CardBindingError::PaymentFrameNotFound);
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn fill_card(
        &self,
        page: &dyn PageHandle,
        frame: &FramePath,
        card: &Card,
    ) -> Result<(), CardBindingError> {
        let expiry = card.expiry_mmyy();
        let fields = [
            (CARD_NUMBER_SELECTOR, 0, card.number.as_str()),
            (EXPIRY_SELECTOR, 1, expiry.as_str()),
            (CVV_SELECTOR, 2, card.cvv.as_str()),
        ];
        for (selector, position, value) in fields {
            let filled = if page.count(frame, selector).await.map_err(page_err)? > 0 {
                page.fill(frame, selector, 0, value).await
            } else {
                page.fill(frame, ANY_INPUT, position, value).await
            }
            .map_err(page_err)?;
            if !filled {
                let found = page.count(frame, ANY_INPUT).await.map_err(page_err)?;
                return Err(CardBindingError::FieldsMissing { found });
            }
        }
        Ok(())
    }

    async fn save(&self, page: &dyn PageHandle, frame: &FramePath) -> Result<(), CardBindingError> {
        if page
            .click_text(frame, CLICKABLE, SAVE_TEXTS)
            .await
            .map_err(page_err)?
        {
            return Ok(());
        }
        for info in frame_tree(page, self.search_depth).await.map_err(page_err)? {
            if page
                .click_text(&info.path, CLICKABLE, SAVE_TEXTS)
                .await
                .map_err(page_err)?
            {
                return Ok(());
            }
        }
        Err(CardBindingError::SaveButtonNotFound)
    }

    /// 在任意文档中点击订阅（每个文档一次），等待成功或失败标记
    async fn await_result(&self, page: &dyn PageHandle) -> Result<(), CardBindingError> {
        let deadline = Instant::now() + self.result_timeout;
        let mut subscribe_clicked: HashSet<FramePath> = HashSet::new();

        loop {
            for info in frame_tree(page, self.search_depth).await.map_err(page_err)? {
                let Some(snapshot) = page.snapshot(&info.path).await.map_err(page_err)? else {
                    continue;
                };
                let text = keywords::normalize(&snapshot.text);
                if let Some(marker) = SUCCESS_MARKERS
                    .iter()
                    .find(|m| keywords::contains_phrase(&text, m))
                {
                    info!("✓ 订阅成功 (标记: {})", marker);
                    return Ok(());
                }
                if let Some(marker) = ERROR_MARKERS
                    .iter()
                    .find(|m| keywords::contains_phrase(&text, m))
                {
                    warn!("❌ 绑卡被拒绝: {}", marker);
                    return Err(CardBindingError::Rejected((*marker).to_string()));
                }
                if !subscribe_clicked.contains(&info.path)
                    && page
                        .click_text(&info.path, CLICKABLE, SUBSCRIBE_TEXTS)
                        .await
                        .map_err(page_err)?
                {
                    debug!("已点击订阅 (frame {})", info.path);
                    subscribe_clicked.insert(info.path.clone());
                }
            }

            if Instant::now() >= deadline {
                return Err(CardBindingError::Rejected("bind_result_timeout".to_string()));
            }
            sleep(self.poll_interval).await;
        }
    }
}

fn page_err(e: anyhow::Error) -> CardBindingError {
    CardBindingError::Page(e.to_string())
}
