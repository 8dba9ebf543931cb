//! 状态分类服务 - 业务能力层
//!
//! 在固定预算内轮询页面，把账号归入五种结论之一。
//!
//! 规则按优先级依次判断：
//! 1. 无资格提示 → `ineligible`
//! 2. 验证按钮 + 可提取 SheerID 链接 → `link_ready`
//! 3. 领取优惠 → `verified`
//! 4. 已订阅 → `subscribed`
//! 5. 超时 → `error`
//!
//! 分类永远不会返回 Rust 错误，所有失败都折叠进 [`Verdict`]。

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::keywords::{self, KeywordTable};
use super::translator::Translator;
use crate::config::Config;
use crate::infrastructure::{frame_tree, FramePath, PageHandle};
use crate::models::Verdict;

/// 验证按钮可能的元素
const CTA_SELECTOR: &str = "a, button, [role=\"button\"]";

/// 翻译调用耗尽检测预算时的原因
const TRANSLATION_TIMEOUT: &str = "translation_failed: timeout";

/// 嵌套 iframe 快照的最大深度
const SNAPSHOT_FRAME_DEPTH: usize = 3;

static SHEERID_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https://[^"'\s<>]*sheerid[^"'\s<>]*"#).expect("sheerid regex is valid")
});

/// 一次轮询看到的页面
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    pub text: String,
    pub html: String,
    pub url: String,
    pub lang: String,
    /// 可达的嵌套 iframe：(url, text)
    pub frames: Vec<(String, String)>,
}

impl PageSnapshot {
    /// 顶层和所有 iframe 的可见文本，已归一化
    pub fn normalized_text(&self) -> String {
        let mut all = self.text.clone();
        for (_, text) in &self.frames {
            all.push('\n');
            all.push_str(text);
        }
        keywords::normalize(&all)
    }

    /// 提取 SheerID 链接：页面 URL、iframe URL、HTML 中的链接依次尝试
    pub fn sheerid_link(&self) -> Option<String> {
        if is_sheerid(&self.url) {
            return Some(self.url.clone());
        }
        if let Some((url, _)) = self.frames.iter().find(|(url, _)| is_sheerid(url)) {
            return Some(url.clone());
        }
        SHEERID_LINK_RE
            .find(&self.html)
            .map(|m| m.as_str().replace("&amp;", "&"))
    }
}

fn is_sheerid(url: &str) -> bool {
    url.starts_with("http") && url.to_lowercase().contains("sheerid")
}

/// 单次规则判断的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Decided(Verdict),
    /// 有验证按钮但还拿不到链接
    NeedsCtaClick,
    Undecided,
}

/// 对归一化文本按优先级应用规则 1-4
pub fn evaluate_rules(
    snapshot: &PageSnapshot,
    text: &str,
    tables: &[&'static KeywordTable],
) -> Evaluation {
    if let Some(phrase) = keywords::find_phrase(text, tables, |t| t.ineligible) {
        return Evaluation::Decided(Verdict::ineligible(phrase));
    }
    if keywords::find_phrase(text, tables, |t| t.verify_cta).is_some() {
        return match snapshot.sheerid_link() {
            Some(link) => Evaluation::Decided(Verdict::link_ready(link)),
            None => Evaluation::NeedsCtaClick,
        };
    }
    if keywords::find_phrase(text, tables, |t| t.verified).is_some() {
        return Evaluation::Decided(Verdict::verified());
    }
    if keywords::find_phrase(text, tables, |t| t.subscribed).is_some() {
        return Evaluation::Decided(Verdict::subscribed());
    }
    Evaluation::Undecided
}

/// 状态分类器
///
/// 职责：
/// - 轮询页面快照并应用规则
/// - 必要时点击一次验证按钮
/// - 未覆盖语言时走翻译回退
/// - 不写库，不绑卡
pub struct Classifier {
    budget: Duration,
    poll_interval: Duration,
    translator: Option<Arc<dyn Translator>>,
}

impl Classifier {
    pub fn new(budget: Duration, poll_interval: Duration) -> Self {
        Self {
            budget,
            poll_interval,
            translator: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.detection_timeout(), config.poll_interval())
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    /// 在预算内分类当前页面
    pub async fn classify(&self, page: &dyn PageHandle) -> Verdict {
        let deadline = Instant::now() + self.budget;
        let mut cta_clicked = false;
        let mut translation_issue: Option<String> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, capture(page)).await {
                Ok(Ok(snapshot)) => {
                    let tables = keywords::tables_for(&snapshot.lang);
                    let text = snapshot.normalized_text();
                    let mut evaluation = evaluate_rules(&snapshot, &text, &tables);

                    if evaluation == Evaluation::Undecided
                        && !text.is_empty()
                        && needs_translation(&snapshot.lang)
                    {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        match timeout(remaining, self.translate(&text)).await {
                            Ok(Ok(translated)) => {
                                translation_issue = None;
                                let en = keywords::tables_for(keywords::FALLBACK_LANG);
                                evaluation = evaluate_rules(&snapshot, &translated, &en);
                            }
                            Ok(Err(reason)) => translation_issue = Some(reason),
                            Err(_) => {
                                translation_issue = Some(TRANSLATION_TIMEOUT.to_string())
                            }
                        }
                    }

                    match evaluation {
                        Evaluation::Decided(verdict) => {
                            info!("✓ 分类结果: {}", verdict);
                            return verdict;
                        }
                        Evaluation::NeedsCtaClick if !cta_clicked => {
                            cta_clicked = true;
                            self.click_cta(page, &tables).await;
                        }
                        _ => {}
                    }
                }
                Ok(Err(e)) => warn!("⚠️ 读取页面快照失败，稍后重试: {}", e),
                Err(_) => warn!("⚠️ 读取页面快照超出检测预算"),
            }

            if Instant::now() >= deadline {
                let verdict = if cta_clicked {
                    Verdict::error("link_extraction_failed")
                } else if let Some(reason) = translation_issue {
                    Verdict::error(reason)
                } else {
                    Verdict::timeout()
                };
                warn!("⚠️ 分类超时: {}", verdict);
                return verdict;
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn translate(&self, text: &str) -> Result<String, String> {
        let Some(translator) = &self.translator else {
            return Err("translation_unavailable".to_string());
        };
        translator
            .translate_to_english(text)
            .await
            .map(|t| keywords::normalize(&t))
            .map_err(|e| e.to_string())
    }

    async fn click_cta(&self, page: &dyn PageHandle, tables: &[&'static KeywordTable]) {
        let phrases: Vec<&str> = tables
            .iter()
            .flat_map(|t| t.verify_cta.iter().copied())
            .collect();
        match page.click_text(&FramePath::root(), CTA_SELECTOR, &phrases).await {
            Ok(true) => info!("已点击验证按钮，等待链接出现"),
            Ok(false) => debug!("未找到可点击的验证按钮"),
            Err(e) => warn!("⚠️ 点击验证按钮失败: {}", e),
        }
    }
}

fn needs_translation(lang: &str) -> bool {
    !keywords::primary_subtag(lang).is_empty() && !keywords::is_covered(lang)
}

/// 抓取顶层文档和嵌套 iframe 的快照
async fn capture(page: &dyn PageHandle) -> anyhow::Result<PageSnapshot> {
    let root = page
        .snapshot(&FramePath::root())
        .await?
        .ok_or_else(|| anyhow::anyhow!("顶层文档不可达"))?;

    let mut frames = Vec::new();
    for info in frame_tree(page, SNAPSHOT_FRAME_DEPTH).await?.into_iter().skip(1) {
        if let Some(snap) = page.snapshot(&info.path).await? {
            let url = if snap.url.is_empty() { info.src } else { snap.url };
            frames.push((url, snap.text));
        } else if !info.src.is_empty() {
            frames.push((info.src, String::new()));
        }
    }

    Ok(PageSnapshot {
        text: root.text,
        html: root.html,
        url: root.url,
        lang: root.lang,
        frames,
    })
}
