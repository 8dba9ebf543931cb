use std::fmt;

use serde::{Deserialize, Serialize};

/// 银行卡记录：`Number Month Year CVV`
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub number: String,
    /// 01-12
    pub exp_month: String,
    /// 两位年份
    pub exp_year: String,
    pub cvv: String,
}

impl Card {
    /// 解析空格分隔的一行，失败时返回原因
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 4 {
            return Err(format!("需要 4 个字段，实际 {}", parts.len()));
        }
        let (number, month, year, cvv) = (parts[0], parts[1], parts[2], parts[3]);

        if !(13..=19).contains(&number.len()) || !all_digits(number) {
            return Err("卡号必须是 13-19 位数字".to_string());
        }
        let month_ok = month.len() == 2
            && all_digits(month)
            && matches!(month.parse::<u8>(), Ok(1..=12));
        if !month_ok {
            return Err("月份必须是 01-12".to_string());
        }
        if year.len() != 2 || !all_digits(year) {
            return Err("年份必须是两位数字".to_string());
        }
        if !(3..=4).contains(&cvv.len()) || !all_digits(cvv) {
            return Err("CVV 必须是 3-4 位数字".to_string());
        }

        Ok(Self {
            number: number.to_string(),
            exp_month: month.to_string(),
            exp_year: year.to_string(),
            cvv: cvv.to_string(),
        })
    }

    /// 到期日输入框格式 `MMYY`
    pub fn expiry_mmyy(&self) -> String {
        format!("{}{}", self.exp_month, self.exp_year)
    }

    /// 日志用：只保留后四位
    pub fn masked(&self) -> String {
        let tail = &self.number[self.number.len().saturating_sub(4)..];
        format!("****{}", tail)
    }

    /// 卡片文件中的一行
    pub fn to_line(&self) -> String {
        format!("{} {} {} {}", self.number, self.exp_month, self.exp_year, self.cvv)
    }
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Card")
            .field("number", &self.masked())
            .field("exp", &format!("{}/{}", self.exp_month, self.exp_year))
            .finish()
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}
