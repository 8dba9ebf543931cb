//! 2FA 动态码
//!
//! 纯函数：同一密钥、同一 30 秒时间窗生成的验证码相同。

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use totp_rs::{Algorithm, Secret, TOTP};

/// 时间窗长度（秒）
pub const STEP_SECS: u64 = 30;

/// 用 base32 密钥生成指定时刻的 6 位验证码
///
/// 密钥中的空格、`=` 填充和大小写差异会被忽略。
pub fn code_at(secret: &str, unix_secs: u64) -> Result<String> {
    let cleaned: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .collect::<String>()
        .to_uppercase();
    let bytes = Secret::Encoded(cleaned)
        .to_bytes()
        .map_err(|e| anyhow::anyhow!("2FA 密钥不是合法的 base32: {:?}", e))?;

    let totp = TOTP::new_unchecked(Algorithm::SHA1, 6, 1, STEP_SECS, bytes, None, String::new());
    Ok(totp.generate(unix_secs))
}

/// 当前时刻的验证码
pub fn current_code(secret: &str) -> Result<String> {
    code_at(secret, unix_now()?)
}

pub fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("系统时间早于 UNIX 纪元")?
        .as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 SHA1 测试密钥 "12345678901234567890"
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn test_rfc6238_vectors() {
        assert_eq!(code_at(RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(code_at(RFC_SECRET, 1111111109).unwrap(), "081804");
    }

    #[test]
    fn test_same_step_same_code() {
        assert_eq!(
            code_at(RFC_SECRET, 1111111110).unwrap(),
            code_at(RFC_SECRET, 1111111119).unwrap()
        );
    }

    #[test]
    fn test_secret_formatting_is_ignored() {
        let spaced = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(code_at(spaced, 59).unwrap(), "287082");
    }

    #[test]
    fn test_invalid_secret_is_an_error() {
        assert!(code_at("not base32 !!", 59).is_err());
    }
}
