//! 学习者意图识别
//!
//! 快速规则匹配优先（不调用工具）；规则判不了的消息交给 classify_intent 工具，
//! 工具输出再解析回同一枚举。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::text_from_value;

/// classify_intent 的标签集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearnerIntent {
    /// 想要一道题
    RequestQuestion,
    /// 请求讲解/帮助
    RequestHelp,
    /// 表示已理解
    UnderstandingConfirmation,
    /// 表示困惑
    Confusion,
    /// 像是在作答
    AnswerAttempt,
    /// 其他
    General,
}

impl LearnerIntent {
    pub fn label(&self) -> &'static str {
        match self {
            LearnerIntent::RequestQuestion => "request_question",
            LearnerIntent::RequestHelp => "request_help",
            LearnerIntent::UnderstandingConfirmation => "understanding_confirmation",
            LearnerIntent::Confusion => "confusion",
            LearnerIntent::AnswerAttempt => "answer_attempt",
            LearnerIntent::General => "general",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "request_question" => Some(LearnerIntent::RequestQuestion),
            "request_help" => Some(LearnerIntent::RequestHelp),
            "understanding_confirmation" => Some(LearnerIntent::UnderstandingConfirmation),
            "confusion" => Some(LearnerIntent::Confusion),
            "answer_attempt" => Some(LearnerIntent::AnswerAttempt),
            "general" => Some(LearnerIntent::General),
            _ => None,
        }
    }

    /// 从 classify_intent 工具输出解析：裸字符串或 {"intent": "..."}；解析不出取 General
    pub fn from_tool_output(payload: &Value) -> Self {
        let label = match payload {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => payload
                .get("intent")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| text_from_value(payload)),
            _ => None,
        };
        label
            .as_deref()
            .and_then(Self::from_label)
            .unwrap_or(LearnerIntent::General)
    }
}

/// 快速规则匹配（不调用工具）；None 表示规则判不了
pub fn fast_match(input: &str) -> Option<LearnerIntent> {
    let lower = input.trim().to_lowercase();
    if lower.is_empty() {
        return Some(LearnerIntent::General);
    }

    const QUESTION_CUES: [&str; 6] = [
        "ready",
        "next question",
        "give me a question",
        "quiz me",
        "another one",
        "let's go",
    ];
    if QUESTION_CUES.iter().any(|cue| lower.contains(cue)) {
        return Some(LearnerIntent::RequestQuestion);
    }

    if signals_understanding(&lower) {
        return Some(LearnerIntent::UnderstandingConfirmation);
    }

    const CONFUSION_CUES: [&str; 5] = [
        "confused",
        "don't understand",
        "dont understand",
        "i'm lost",
        "no idea",
    ];
    if CONFUSION_CUES.iter().any(|cue| lower.contains(cue)) {
        return Some(LearnerIntent::Confusion);
    }

    const HELP_CUES: [&str; 5] = ["explain", "help", "what is", "how do", "why"];
    if HELP_CUES.iter().any(|cue| lower.contains(cue)) {
        return Some(LearnerIntent::RequestHelp);
    }

    None
}

/// 消息是否表示「已理解，可以继续」；引导与补救态据此发 retry_question
pub fn signals_understanding(input: &str) -> bool {
    let lower = input.trim().to_lowercase();
    // 单词级匹配，避免 "broke" 误中 "ok" 这类子串
    const WORD_CUES: [&str; 5] = ["ok", "okay", "ready", "understood", "yes"];
    if lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| WORD_CUES.contains(&word))
    {
        return true;
    }
    const PHRASE_CUES: [&str; 3] = ["got it", "i see", "makes sense"];
    PHRASE_CUES.iter().any(|cue| lower.contains(cue))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fast_match_request_question() {
        assert_eq!(fast_match("I'm ready"), Some(LearnerIntent::RequestQuestion));
        assert_eq!(fast_match("quiz me!"), Some(LearnerIntent::RequestQuestion));
    }

    #[test]
    fn test_fast_match_confusion() {
        assert_eq!(fast_match("I'm confused"), Some(LearnerIntent::Confusion));
        assert_eq!(
            fast_match("I don't understand this"),
            Some(LearnerIntent::Confusion)
        );
    }

    #[test]
    fn test_fast_match_help() {
        assert_eq!(
            fast_match("can you explain fractions"),
            Some(LearnerIntent::RequestHelp)
        );
    }

    #[test]
    fn test_fast_match_defers_to_tool() {
        assert_eq!(fast_match("bananas are yellow"), None);
    }

    #[test]
    fn test_signals_understanding() {
        assert!(signals_understanding("ok"));
        assert!(signals_understanding("got it, thanks"));
        assert!(signals_understanding("I see"));
        assert!(!signals_understanding("hmm"));
    }

    #[test]
    fn test_from_tool_output() {
        assert_eq!(
            LearnerIntent::from_tool_output(&json!("request_question")),
            LearnerIntent::RequestQuestion
        );
        assert_eq!(
            LearnerIntent::from_tool_output(&json!({"intent": "confusion"})),
            LearnerIntent::Confusion
        );
        assert_eq!(
            LearnerIntent::from_tool_output(&json!("nonsense")),
            LearnerIntent::General
        );
    }
}
