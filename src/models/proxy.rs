use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PROXY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(socks5|https?)://(?:([^:@/\s]+):([^@/\s]*)@)?([^:@/\s]+):(\d{1,5})$")
        .expect("proxy regex is valid")
});

/// 代理协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Https => "https",
            ProxyScheme::Socks5 => "socks5",
        }
    }
}

/// 代理记录：`scheme://[user:pass@]host:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Proxy {
    pub scheme: ProxyScheme,
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
}

impl FromStr for Proxy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = PROXY_RE.captures(s.trim()).ok_or_else(|| s.to_string())?;
        let scheme = match caps[1].to_ascii_lowercase().as_str() {
            "socks5" => ProxyScheme::Socks5,
            "https" => ProxyScheme::Https,
            _ => ProxyScheme::Http,
        };
        let port: u16 = caps[5].parse().map_err(|_| s.to_string())?;
        if port == 0 {
            return Err(s.to_string());
        }
        Ok(Self {
            scheme,
            username: caps.get(2).map(|m| m.as_str().to_string()),
            password: caps.get(3).map(|m| m.as_str().to_string()),
            host: caps[4].to_string(),
            port,
        })
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme.as_str())?;
        if let Some(user) = &self.username {
            write!(f, "{}:{}@", user, self.password.as_deref().unwrap_or(""))?;
        }
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Proxy {
    /// 日志用：隐藏凭据
    pub fn redacted(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}
