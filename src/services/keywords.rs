//! 多语言关键词表
//!
//! 以语言主标签为键的编译期 `phf` 表。所有短语都是归一化后的形式
//! （小写、空白折叠、弯引号折叠为 `'`），与 [`normalize`] 的输出直接比较。

use phf::phf_map;

/// 单一语言的四组短语，对应分类规则 1-4
#[derive(Debug)]
pub struct KeywordTable {
    /// 无资格提示
    pub ineligible: &'static [&'static str],
    /// "验证资格"按钮
    pub verify_cta: &'static [&'static str],
    /// 已验证 / 领取优惠
    pub verified: &'static [&'static str],
    /// 已订阅
    pub subscribed: &'static [&'static str],
}

/// 翻译回退后用于匹配的语言
pub const FALLBACK_LANG: &str = "en";

pub static KEYWORDS: phf::Map<&'static str, KeywordTable> = phf_map! {
    "en" => KeywordTable {
        ineligible: &[
            "not eligible",
            "isn't eligible",
            "offer is not available",
            "offer isn't available",
            "offer unavailable",
            "this offer is unavailable",
            "not available for your account",
        ],
        verify_cta: &["verify your eligibility", "verify eligibility", "verify now"],
        verified: &["get student offer", "get offer"],
        subscribed: &["already subscribed", "you're subscribed", "subscribed"],
    },
    "es" => KeywordTable {
        ineligible: &["no cumples los requisitos", "no es apto", "la oferta no está disponible", "oferta no disponible"],
        verify_cta: &["verifica tu elegibilidad", "verificar la elegibilidad", "verificar elegibilidad"],
        verified: &["obtener la oferta", "obtener oferta"],
        subscribed: &["ya estás suscrito", "suscrito"],
    },
    "fr" => KeywordTable {
        ineligible: &["n'êtes pas éligible", "pas éligible", "l'offre n'est pas disponible", "offre non disponible"],
        verify_cta: &["vérifiez votre éligibilité", "vérifier l'éligibilité", "vérifier votre éligibilité"],
        verified: &["obtenir l'offre", "profiter de l'offre"],
        subscribed: &["déjà abonné", "abonné"],
    },
    "de" => KeywordTable {
        ineligible: &["nicht berechtigt", "angebot ist nicht verfügbar", "nicht verfügbar"],
        verify_cta: &["berechtigung prüfen", "berechtigung bestätigen", "berechtigung überprüfen"],
        verified: &["angebot erhalten", "angebot sichern"],
        subscribed: &["bereits abonniert", "abonniert"],
    },
    "it" => KeywordTable {
        ineligible: &["non sei idoneo", "non idoneo", "offerta non è disponibile", "offerta non disponibile"],
        verify_cta: &["verifica la tua idoneità", "verifica l'idoneità", "verifica idoneità"],
        verified: &["ottieni l'offerta", "ottieni offerta"],
        subscribed: &["già abbonato", "abbonato"],
    },
    "pt" => KeywordTable {
        ineligible: &["não está qualificado", "não qualificado", "oferta não está disponível", "oferta indisponível"],
        verify_cta: &["verifique sua qualificação", "verificar qualificação", "verificar elegibilidade"],
        verified: &["resgatar oferta", "obter oferta", "receber oferta"],
        subscribed: &["já é assinante", "assinatura ativa"],
    },
    "zh" => KeywordTable {
        ineligible: &["不符合资格", "不符合條件", "无法使用此优惠", "优惠不可用"],
        verify_cta: &["验证您的资格", "验证资格", "驗證資格"],
        verified: &["获取学生优惠", "获取优惠", "領取優惠"],
        subscribed: &["已订阅", "已訂閱"],
    },
    "ja" => KeywordTable {
        ineligible: &["対象外です", "ご利用いただけません", "特典は利用できません"],
        verify_cta: &["資格を確認", "利用資格を確認"],
        verified: &["特典を入手", "オファーを入手"],
        subscribed: &["登録済み", "購読済み"],
    },
    "ko" => KeywordTable {
        ineligible: &["자격이 없습니다", "사용할 수 없는 혜택", "이용할 수 없습니다"],
        verify_cta: &["자격 확인", "자격 인증"],
        verified: &["혜택 받기", "제안 받기"],
        subscribed: &["구독 중", "이미 구독"],
    },
    "ru" => KeywordTable {
        ineligible: &["не соответствуете требованиям", "предложение недоступно", "недоступно для вашего аккаунта"],
        verify_cta: &["подтвердить право", "проверить право на участие"],
        verified: &["получить предложение", "воспользоваться предложением"],
        subscribed: &["вы подписаны", "подписка оформлена"],
    },
    "vi" => KeywordTable {
        ineligible: &["không đủ điều kiện", "ưu đãi không khả dụng"],
        verify_cta: &["xác minh tư cách", "xác minh điều kiện"],
        verified: &["nhận ưu đãi"],
        subscribed: &["đã đăng ký"],
    },
    "id" => KeywordTable {
        ineligible: &["tidak memenuhi syarat", "penawaran tidak tersedia"],
        verify_cta: &["verifikasi kelayakan", "verifikasi kelayakan anda"],
        verified: &["dapatkan penawaran"],
        subscribed: &["sudah berlangganan"],
    },
    "tr" => KeywordTable {
        ineligible: &["uygun değilsiniz", "uygun değil", "teklif kullanılamıyor"],
        verify_cta: &["uygunluğunuzu doğrulayın", "uygunluğu doğrula"],
        verified: &["teklifi al"],
        subscribed: &["abone olundu", "zaten abonesiniz"],
    },
};

/// 取语言声明的主标签：`zh-CN` → `zh`，`PT_br` → `pt`
pub fn primary_subtag(lang: &str) -> String {
    lang.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// 该语言是否有关键词表
pub fn is_covered(lang: &str) -> bool {
    KEYWORDS.contains_key(primary_subtag(lang).as_str())
}

/// 用于匹配的表：已覆盖的语言用本语言表加英文表，
/// 未声明或未覆盖的语言用全部表。
pub fn tables_for(lang: &str) -> Vec<&'static KeywordTable> {
    let primary = primary_subtag(lang);
    if primary.is_empty() || !KEYWORDS.contains_key(primary.as_str()) {
        return KEYWORDS.values().collect();
    }
    let mut tables = Vec::with_capacity(2);
    if let Some(table) = KEYWORDS.get(primary.as_str()) {
        tables.push(table);
    }
    if primary != FALLBACK_LANG {
        if let Some(en) = KEYWORDS.get(FALLBACK_LANG) {
            tables.push(en);
        }
    }
    tables
}

/// 归一化页面文本：小写、空白折叠、弯引号折叠
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{02BC}' | '\u{00B4}' | '`' => '\'',
            '\u{00A0}' => ' ',
            c => c,
        })
        .collect();
    folded
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// 紧挨在短语前、使命中失效的否定词（"not subscribed"）
const NEGATIONS: &[&str] = &[
    "not", "no", "never", "isn't", "aren't", "haven't", "hasn't", "wasn't", "nicht", "non",
    "não", "pas", "không", "chưa", "tidak", "belum", "не",
];

/// 拉丁、西里尔等以空格分词的文字；中日韩字符不要求词边界
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
        && !matches!(c,
            '\u{3040}'..='\u{30FF}'
            | '\u{3400}'..='\u{9FFF}'
            | '\u{AC00}'..='\u{D7AF}'
            | '\u{F900}'..='\u{FAFF}')
}

/// 按词边界匹配归一化短语，并忽略前一个词是否定词的命中
///
/// `subscribed` 不会命中 `unsubscribed` 或 `not subscribed`。
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    let first = phrase.chars().next();
    let last = phrase.chars().next_back();
    let joined = |edge: Option<char>, neighbour: Option<char>| {
        matches!((edge, neighbour), (Some(a), Some(b)) if is_word_char(a) && is_word_char(b))
    };

    text.match_indices(phrase).any(|(start, _)| {
        let before = &text[..start];
        let after = &text[start + phrase.len()..];
        if joined(first, before.chars().next_back()) || joined(last, after.chars().next()) {
            return false;
        }
        !before
            .split_whitespace()
            .next_back()
            .is_some_and(|word| NEGATIONS.contains(&word))
    })
}

/// 在文本中查找第一组命中的短语
pub fn find_phrase(
    text: &str,
    tables: &[&'static KeywordTable],
    pick: fn(&'static KeywordTable) -> &'static [&'static str],
) -> Option<&'static str> {
    tables
        .iter()
        .flat_map(|table| pick(table).iter())
        .find(|phrase| contains_phrase(text, phrase))
        .copied()
}
