//! Mock 工具客户端（测试与本地演示用，无需任何 API）
//!
//! 按工具名排队脚本化响应；队列为空时回落到确定性的内置输出，
//! 便于在无外部提供方的情况下跑通完整辅导流程。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{ToolClient, ToolName};

/// 单次调用的脚本行为
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// 立即返回该值
    Respond(Value),
    /// 延迟后返回该值
    RespondAfter(Duration, Value),
    /// 返回失败原因
    Fail(String),
    /// 模拟工具处理器崩溃
    Panic,
    /// 永不返回（供超时与取消测试）
    Hang,
}

/// Mock 客户端：脚本化响应 + 调用记录
#[derive(Default)]
pub struct MockToolClient {
    script: Mutex<HashMap<ToolName, VecDeque<MockBehavior>>>,
    calls: Mutex<Vec<(ToolName, Value)>>,
}

impl MockToolClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为某工具追加一次脚本化响应（FIFO 消费）
    pub fn queue(&self, tool: ToolName, behavior: MockBehavior) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .entry(tool)
            .or_default()
            .push_back(behavior);
    }

    /// 该工具被调用的次数
    pub fn call_count(&self, tool: ToolName) -> usize {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .iter()
            .filter(|(t, _)| *t == tool)
            .count()
    }

    /// 全部调用记录（按发生顺序）
    pub fn calls(&self) -> Vec<(ToolName, Value)> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    /// 队列为空时的确定性内置输出
    fn canned(tool: ToolName, args: &Value) -> Result<Value, String> {
        match tool {
            ToolName::GenerateQuestion => {
                let topic = args
                    .pointer("/topic/name")
                    .and_then(Value::as_str)
                    .unwrap_or("arithmetic");
                Ok(json!({
                    "text": "What is 7 + 8?",
                    "topic": topic,
                    "type": "short_answer",
                    "correct_answer": "15",
                    "difficulty": 1,
                }))
            }
            ToolName::CheckAnswer => {
                let expected = args
                    .pointer("/question/correct_answer")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let given = args
                    .get("student_answer")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let is_correct =
                    expected.trim().eq_ignore_ascii_case(given.trim()) && !expected.is_empty();
                Ok(json!({
                    "is_correct": is_correct,
                    "feedback": if is_correct { "Correct!" } else { "Not quite." },
                    "explanation": format!("The expected answer is {expected}."),
                    "student_answer": given,
                    "correct_answer": expected,
                }))
            }
            ToolName::DiagnoseError => Ok(json!({
                "error_identified": true,
                "error_category": "computational",
                "error_description": "Slip in basic arithmetic.",
                "misconception": null,
                "confidence": 0.8,
                "suggested_approach": "Redo the calculation one step at a time.",
            })),
            ToolName::CreateRemediation => Ok(json!(
                "Let's slow down and redo the calculation together, one step at a time."
            )),
            ToolName::ExplainConcept => {
                let message = args.get("message").and_then(Value::as_str).unwrap_or("");
                Ok(json!(format!(
                    "Good question. Let's reason about \"{message}\" from first principles."
                )))
            }
            ToolName::ProvideHint => Ok(json!(
                "Hint: break the problem into smaller parts and check each one."
            )),
            ToolName::ClassifyIntent => Ok(json!("general")),
        }
    }
}

#[async_trait]
impl ToolClient for MockToolClient {
    async fn invoke(&self, tool: ToolName, args: Value) -> Result<Value, String> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push((tool, args.clone()));

        let behavior = self
            .script
            .lock()
            .expect("script lock poisoned")
            .get_mut(&tool)
            .and_then(VecDeque::pop_front);

        match behavior {
            None => Self::canned(tool, &args),
            Some(MockBehavior::Respond(value)) => Ok(value),
            Some(MockBehavior::RespondAfter(delay, value)) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Some(MockBehavior::Fail(reason)) => Err(reason),
            Some(MockBehavior::Panic) => panic!("mock tool {tool} panicked"),
            Some(MockBehavior::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_canned() {
        let client = MockToolClient::new();
        client.queue(
            ToolName::ClassifyIntent,
            MockBehavior::Respond(json!("request_question")),
        );

        let first = client.invoke(ToolName::ClassifyIntent, json!({})).await;
        assert_eq!(first.unwrap(), json!("request_question"));

        // 队列耗尽后回落到内置输出
        let second = client.invoke(ToolName::ClassifyIntent, json!({})).await;
        assert_eq!(second.unwrap(), json!("general"));
        assert_eq!(client.call_count(ToolName::ClassifyIntent), 2);
    }

    #[tokio::test]
    async fn test_canned_check_answer() {
        let client = MockToolClient::new();
        let args = json!({
            "question": {"correct_answer": "15"},
            "student_answer": " 15 ",
        });
        let out = client.invoke(ToolName::CheckAnswer, args).await.unwrap();
        assert_eq!(out["is_correct"], json!(true));
    }
}
