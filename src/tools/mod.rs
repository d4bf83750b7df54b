//! 教学工具层
//!
//! 工具是外部协作方（通常为 LLM 调用）提供的固定七种操作；核心只依赖
//! ToolClient 契约，一律经由 ToolExecutor 提交，绝不在会话上下文内同步等待。
//! 工具输出按字段宽容消费：缺失字段回落到 fallback 模块的默认值。

pub mod executor;
pub mod fallback;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use executor::{CallToken, ToolExecutor, ToolOutcome, ToolResult};
pub use mock::{MockBehavior, MockToolClient};

/// 固定的教学工具集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    GenerateQuestion,
    CheckAnswer,
    DiagnoseError,
    CreateRemediation,
    ExplainConcept,
    ProvideHint,
    ClassifyIntent,
}

impl ToolName {
    /// 稳定的 snake_case 标签（审计日志与 Mock 脚本键）
    pub fn label(&self) -> &'static str {
        match self {
            ToolName::GenerateQuestion => "generate_question",
            ToolName::CheckAnswer => "check_answer",
            ToolName::DiagnoseError => "diagnose_error",
            ToolName::CreateRemediation => "create_remediation",
            ToolName::ExplainConcept => "explain_concept",
            ToolName::ProvideHint => "provide_hint",
            ToolName::ClassifyIntent => "classify_intent",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// 工具客户端契约：具体提供方（HTTP 客户端、请求整形）在核心之外实现
///
/// args 与返回值都是 JSON；错误用字符串原因表达，由会话映射为降级路径。
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn invoke(&self, tool: ToolName, args: Value) -> Result<Value, String>;
}

/// check_answer 输出的宽容视图
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerCheck {
    pub is_correct: bool,
    pub feedback: String,
    pub explanation: Option<String>,
}

impl AnswerCheck {
    /// 从工具输出解析；缺失 is_correct 视为 false，缺失 feedback 用默认话术
    pub fn from_value(payload: &Value) -> Self {
        let is_correct = payload
            .get("is_correct")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let feedback = payload
            .get("feedback")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                if is_correct {
                    "Correct!".to_string()
                } else {
                    "That's not quite right. Let's look at it together.".to_string()
                }
            });
        let explanation = payload
            .get("explanation")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            is_correct,
            feedback,
            explanation,
        }
    }
}

/// 文本类工具（explain / hint / remediation）输出的宽容提取
pub fn text_from_value(payload: &Value) -> Option<String> {
    match payload {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => payload
            .get("text")
            .or_else(|| payload.get("content"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_answer_check_defaults() {
        let check = AnswerCheck::from_value(&json!({}));
        assert!(!check.is_correct);
        assert!(check.feedback.contains("not quite right"));

        let check = AnswerCheck::from_value(&json!({"is_correct": true}));
        assert!(check.is_correct);
        assert_eq!(check.feedback, "Correct!");
    }

    #[test]
    fn test_text_extraction() {
        assert_eq!(text_from_value(&json!("hi")), Some("hi".to_string()));
        assert_eq!(text_from_value(&json!({"text": "hi"})), Some("hi".to_string()));
        assert_eq!(text_from_value(&json!({"content": "hi"})), Some("hi".to_string()));
        assert_eq!(text_from_value(&json!(42)), None);
    }
}
