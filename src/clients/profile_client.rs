/// 指纹浏览器本地 API 客户端
///
/// 封装窗口的查找、创建、打开、关闭
use crate::config::Config;
use crate::models::{Account, Proxy};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// 已打开的浏览器窗口
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedProfile {
    pub profile_id: String,
    /// CDP websocket 地址
    pub ws_endpoint: String,
}

/// 浏览器窗口供应者
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    /// 找到（或创建）账号对应的窗口并打开
    async fn open_profile(&self, account: &Account, proxy: Option<&Proxy>)
        -> Result<OpenedProfile>;

    async fn close_profile(&self, profile_id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    msg: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileEntry {
    id: String,
    #[serde(default)]
    remark: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileList {
    #[serde(default)]
    list: Vec<ProfileEntry>,
}

#[derive(Debug, Deserialize)]
struct CreatedProfile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OpenResult {
    ws: String,
}

/// BitBrowser 本地服务客户端
pub struct BitBrowserClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    template_id: Option<String>,
}

impl BitBrowserClient {
    const LIST_PAGE_SIZE: usize = 100;

    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("无法创建 HTTP 客户端")?;
        Ok(Self {
            http,
            base_url: config.profile_api_url.trim_end_matches('/').to_string(),
            api_key: config.profile_api_key.clone(),
            template_id: config.profile_template_id.clone(),
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        self.send::<T>(path, body)
            .await?
            .with_context(|| format!("{} 响应缺少 data", path))
    }

    async fn send<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let response: ApiResponse<T> = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("请求 {} 失败", path))?
            .json()
            .await
            .with_context(|| format!("解析 {} 响应失败", path))?;

        if !response.success {
            bail!(
                "{} 返回失败: {}",
                path,
                response.msg.unwrap_or_else(|| "未知错误".to_string())
            );
        }
        Ok(response.data)
    }

    async fn find_profile(&self, email: &str) -> Result<Option<String>> {
        let mut page = 0;
        loop {
            let listed: ProfileList = self
                .post(
                    "/browser/list",
                    json!({ "page": page, "pageSize": Self::LIST_PAGE_SIZE }),
                )
                .await?;
            let count = listed.list.len();
            if let Some(found) = find_matching(&listed.list, email) {
                return Ok(Some(found.id.clone()));
            }
            if count < Self::LIST_PAGE_SIZE {
                return Ok(None);
            }
            page += 1;
        }
    }

    async fn template_fingerprint(&self) -> Result<Option<Value>> {
        let Some(template_id) = &self.template_id else {
            return Ok(None);
        };
        let detail: Value = self
            .post("/browser/detail", json!({ "id": template_id }))
            .await
            .context("读取模板窗口失败")?;
        Ok(detail.get("browserFingerPrint").cloned())
    }

    async fn create_profile(&self, account: &Account, proxy: Option<&Proxy>) -> Result<String> {
        let fingerprint = self.template_fingerprint().await?;
        let created: CreatedProfile = self
            .post(
                "/browser/update",
                create_payload(account, proxy, fingerprint),
            )
            .await?;
        info!("✓ 已为 {} 创建窗口 {}", account.email, created.id);
        Ok(created.id)
    }
}

#[async_trait]
impl ProfileProvider for BitBrowserClient {
    async fn open_profile(
        &self,
        account: &Account,
        proxy: Option<&Proxy>,
    ) -> Result<OpenedProfile> {
        let profile_id = match &account.profile_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => match self.find_profile(&account.email).await? {
                Some(id) => {
                    debug!("复用已有窗口 {} ({})", id, account.email);
                    id
                }
                None => self.create_profile(account, proxy).await?,
            },
        };

        let opened: OpenResult = self
            .post("/browser/open", json!({ "id": profile_id }))
            .await
            .with_context(|| format!("打开窗口 {} 失败", profile_id))?;

        Ok(OpenedProfile {
            profile_id,
            ws_endpoint: opened.ws,
        })
    }

    async fn close_profile(&self, profile_id: &str) -> Result<()> {
        self.send::<Value>("/browser/close", json!({ "id": profile_id }))
            .await
            .with_context(|| format!("关闭窗口 {} 失败", profile_id))?;
        Ok(())
    }
}

/// 备注里带邮箱或登录名等于邮箱的窗口
fn find_matching<'a>(entries: &'a [ProfileEntry], email: &str) -> Option<&'a ProfileEntry> {
    let email = email.to_lowercase();
    entries.iter().find(|entry| {
        entry
            .user_name
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(&email))
            || entry
                .remark
                .as_deref()
                .is_some_and(|remark| remark.to_lowercase().contains(&email))
    })
}

fn create_payload(account: &Account, proxy: Option<&Proxy>, fingerprint: Option<Value>) -> Value {
    let mut payload = json!({
        "name": account.email,
        "remark": account.account_line(),
        "userName": account.email,
        "password": account.password,
        "proxyMethod": 2,
        "proxyType": "noproxy",
        "host": "",
        "port": "",
        "proxyUserName": "",
        "proxyPassword": "",
        "browserFingerPrint": fingerprint.unwrap_or_else(|| json!({ "coreVersion": "124" })),
    });

    if let Some(proxy) = proxy {
        // 本地服务只区分 http 与 socks5
        let proxy_type = match proxy.scheme.as_str() {
            "socks5" => "socks5",
            _ => "http",
        };
        payload["proxyType"] = json!(proxy_type);
        payload["host"] = json!(proxy.host);
        payload["port"] = json!(proxy.port.to_string());
        payload["proxyUserName"] = json!(proxy.username.clone().unwrap_or_default());
        payload["proxyPassword"] = json!(proxy.password.clone().unwrap_or_default());
    }
    payload
}
