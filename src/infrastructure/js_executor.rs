//! JS 执行器 - 基础设施层
//!
//! 持有唯一的 page 资源，只暴露"在某个文档里执行 JS"的能力

use anyhow::Result;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use super::page::FramePath;

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval() 能力，可指定 iframe 路径
/// - 不认识 Account / Card
/// - 不处理业务流程
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（导航、刷新等非 JS 操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 在 `frame` 指向的文档里执行 `body`
    ///
    /// `body` 中可以使用变量 `doc`，必须 `return` 结果。
    /// iframe 不可达时返回 `None`。
    pub async fn eval_in_frame<T: DeserializeOwned>(
        &self,
        frame: &FramePath,
        body: &str,
    ) -> Result<Option<T>> {
        self.eval_as(frame_script(frame, body)).await
    }
}

/// 生成逐层进入 iframe 的脚本
pub(crate) fn frame_script(frame: &FramePath, body: &str) -> String {
    let path = serde_json::to_string(frame.indices()).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
    let doc = document;
    for (const idx of {path}) {{
        const frame = doc.querySelectorAll('iframe')[idx];
        if (!frame) return null;
        try {{ doc = frame.contentDocument; }} catch (e) {{ return null; }}
        if (!doc) return null;
    }}
    {body}
}})()"#
    )
}

/// 把字符串编码成 JS 字面量
pub(crate) fn js_str(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
