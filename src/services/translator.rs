//! 翻译服务 - 业务能力层
//!
//! 页面语言不在关键词表中时，把页面文本译成英文再匹配一次。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务均可（自定义 API 端点和模型）

use std::collections::HashMap;
use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::TranslationError;

/// 送去翻译的最大字符数
const MAX_TRANSLATE_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "You translate web page text into English. \
Reply with the translation only, keep button labels literal, add nothing.";

/// 文本翻译能力
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate_to_english(&self, text: &str) -> Result<String, TranslationError>;
}

/// LLM 翻译器
///
/// 职责：
/// - 调用 LLM API 把页面文本译成英文
/// - 不做关键词匹配
pub struct LlmTranslator {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmTranslator {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        }
    }

    /// 未配置 API key 时返回 `None`
    pub fn from_config(config: &Config) -> Option<Self> {
        if config.llm_api_key.trim().is_empty() {
            None
        } else {
            Some(Self::new(config))
        }
    }

    async fn send(&self, text: &str) -> anyhow::Result<String> {
        debug!("调用翻译 API，模型: {}, 文本长度: {}", self.model_name, text.len());

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(text)
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.0)
            .max_tokens(1024u32)
            .build()?;

        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow::anyhow!("LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    async fn translate_to_english(&self, text: &str) -> Result<String, TranslationError> {
        let clipped: String = text.chars().take(MAX_TRANSLATE_CHARS).collect();
        self.send(&clipped).await.map_err(|e| {
            warn!("⚠️ 翻译失败: {}", e);
            TranslationError::Failed(e.to_string())
        })
    }
}

/// 按原文缓存翻译结果（成功和失败都缓存）
pub struct CachedTranslator {
    inner: Arc<dyn Translator>,
    cache: Mutex<HashMap<String, Result<String, String>>>,
}

impl CachedTranslator {
    pub fn new(inner: Arc<dyn Translator>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Translator for CachedTranslator {
    async fn translate_to_english(&self, text: &str) -> Result<String, TranslationError> {
        if let Some(cached) = self.cache.lock().await.get(text) {
            return cached.clone().map_err(TranslationError::Failed);
        }

        let result = self.inner.translate_to_english(text).await;
        let entry = match &result {
            Ok(translated) => Ok(translated.clone()),
            Err(TranslationError::Failed(msg)) => Err(msg.clone()),
            Err(TranslationError::Unavailable) => return result,
        };
        self.cache.lock().await.insert(text.to_string(), entry);
        result
    }
}
