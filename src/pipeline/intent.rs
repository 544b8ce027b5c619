//! 确认意图的快速规则匹配（不调用 LLM）
//!
//! 用于两件事：判断用户是否在回应暂停中的计划，以及判断强制搜索标记是否应被忽略
//! （对「要搜索吗？」回答 "yes" 不能再被当成一次新的强制搜索）。

/// 对确认问题的回复类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Confirm,
    Decline,
    /// 不是明确的确认或拒绝
    Unclear,
}

/// 确认短语；可与 ACK_WORDS 组合（如 "no problem, go ahead"）
const CONFIRM_PHRASES: &[&str] = &[
    "go ahead",
    "do it",
    "sounds good",
    "of course",
    "no problem",
    "no worries",
    "thank you",
    "va bene",
    "d'accordo",
    "fallo pure",
    "vai pure",
    "nessun problema",
];

/// 全部由这些词（或确认短语）组成的短回复视为确认（如 "yes please"、"sì grazie"）
const ACK_WORDS: &[&str] = &[
    "y", "yes", "yeah", "yep", "yup", "ok", "okay", "k", "sure", "please", "go", "ahead", "proceed",
    "confirm", "confirmed", "continue", "thanks", "sì", "si", "certo", "certamente", "procedi",
    "vai", "grazie", "perfetto", "esatto", "confermo",
];

const DECLINE_PHRASES: &[&str] = &[
    "no thanks",
    "no thank you",
    "don't",
    "do not",
    "never mind",
    "nevermind",
    "lascia stare",
    "lascia perdere",
    "no grazie",
    "non farlo",
];

const DECLINE_WORDS: &[&str] = &["no", "nope", "nah", "cancel", "stop", "abort", "annulla", "ferma"];

/// 拒绝词后面允许跟的词（"cancel that"、"no please"）
const DECLINE_FILLER: &[&str] = &["that", "it", "this", "please", "thanks", "grazie", "tutto"];

/// 回复最多多少个词时才走规则匹配
const MAX_RULE_WORDS: usize = 4;

/// 小写、去首尾标点、逗号视为空格
fn normalize(message: &str) -> String {
    let lower = message.to_lowercase().replace([',', ';'], " ");
    lower
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '.' | '!' | '?' | '…' | '"' | '\''))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn word_count(message: &str) -> usize {
    message.split_whitespace().count()
}

/// 判断用户对确认问题的回复；混合了确认与拒绝的回复算 Unclear
pub fn classify_reply(message: &str) -> ReplyKind {
    let normalized = normalize(message);
    if normalized.is_empty() {
        return ReplyKind::Unclear;
    }
    let words: Vec<&str> = normalized.split_whitespace().collect();

    if DECLINE_PHRASES.contains(&normalized.as_str()) || is_plain_decline(&words) {
        return ReplyKind::Decline;
    }
    if words.len() <= MAX_RULE_WORDS && is_confirmation(&words) {
        return ReplyKind::Confirm;
    }
    ReplyKind::Unclear
}

fn is_plain_decline(words: &[&str]) -> bool {
    words.len() <= MAX_RULE_WORDS
        && DECLINE_WORDS.contains(&words[0])
        && words[1..]
            .iter()
            .all(|w| DECLINE_WORDS.contains(w) || DECLINE_FILLER.contains(w))
}

/// 每个词都被确认短语或 ACK_WORDS 覆盖
fn is_confirmation(words: &[&str]) -> bool {
    let mut rest = words;
    while let Some(first) = rest.first() {
        let phrase_len = CONFIRM_PHRASES
            .iter()
            .map(|p| p.split(' ').collect::<Vec<_>>())
            .filter(|p| rest.starts_with(p))
            .map(|p| p.len())
            .max();
        rest = match phrase_len {
            Some(len) => &rest[len..],
            None if ACK_WORDS.contains(first) => &rest[1..],
            None => return false,
        };
    }
    true
}

/// 是否只是对刚才问题的简短确认
pub fn is_bare_acknowledgement(message: &str, max_words: usize) -> bool {
    word_count(message) <= max_words.max(1) && classify_reply(message) == ReplyKind::Confirm
}

/// 强制搜索标记是否生效：正在等待确认时，简短确认不算新的搜索请求
pub fn force_search_applies(
    force_web_search: bool,
    message: &str,
    awaiting_confirmation: bool,
    max_words: usize,
) -> bool {
    force_web_search && !(awaiting_confirmation && is_bare_acknowledgement(message, max_words))
}
