//! 会话状态数据：话题、题目、历史、指标、待定工具调用、快照
//!
//! 快照（SessionSnapshot）既是持久化形态也是 get_snapshot 公开视图的来源；
//! 时间戳用 RFC 3339 序列化，不活跃计时用单调钟、不进快照。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

use crate::core::psm::PsmState;
use crate::tools::ToolName;

/// 学习话题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: u64,
    pub name: String,
    /// 难度层级，课程数据源给出时透传
    #[serde(default)]
    pub tier: Option<u32>,
}

/// 当前题目；仅在出题到关题之间存在
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    pub correct_answer: String,
    #[serde(rename = "type", default = "default_question_kind")]
    pub kind: String,
    #[serde(default)]
    pub difficulty: Option<u32>,
    #[serde(default)]
    pub hint: Option<String>,
}

fn default_question_kind() -> String {
    "short_answer".to_string()
}

impl Question {
    /// 从 generate_question 工具输出宽容解析；text 与 correct_answer 缺一不可
    pub fn from_tool_output(payload: &Value) -> Option<Self> {
        let text = payload.get("text").and_then(Value::as_str)?;
        let correct_answer = payload.get("correct_answer").and_then(Value::as_str)?;
        Some(Self {
            text: text.to_string(),
            correct_answer: correct_answer.to_string(),
            kind: payload
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("short_answer")
                .to_string(),
            difficulty: payload
                .get("difficulty")
                .and_then(Value::as_u64)
                .map(|d| d as u32),
            hint: payload
                .get("hint")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// 历史条目角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
}

/// 对话历史条目（仅追加，严格按时间排序）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// 会话指标：除 last_activity 外均单调
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub started_at: DateTime<Utc>,
    pub questions_attempted: u32,
    pub questions_correct: u32,
    pub topics_covered: BTreeSet<u64>,
    pub last_activity: DateTime<Utc>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            questions_attempted: 0,
            questions_correct: 0,
            topics_covered: BTreeSet::new(),
            last_activity: now,
        }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 会话对结果的处置意图：决定 ToolResult 到达后走哪条路，
/// 并携带产生回复所需的上下文，避免事后重推
#[derive(Debug, Clone, PartialEq)]
pub enum CallIntent {
    /// generate_question 结果作为当前话题的新题呈现
    QuestionForTopic,
    /// check_answer 结果评判该作答
    AnswerCheck { answer: String },
    /// diagnose_error 结果决定已知/未知补救路线
    Diagnosis { answer: String },
    /// create_remediation 文本直接发出，等待用户表态
    Remediation,
    /// provide_hint 文本直接发出，留在引导态
    Hint,
    /// explain_concept 文本直接发出，回到讲解态
    Explanation,
    /// classify_intent 结果驱动讲解态路由
    IntentClassify { message: String },
}

/// 在途工具调用记录；令牌在一个会话内至多出现一次
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub tool: ToolName,
    pub intent: CallIntent,
    pub started_at: Instant,
}

/// 可序列化的会话快照：持久化形态，也是恢复的输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub learner_id: String,
    pub psm_state: PsmState,
    pub topic: Option<Topic>,
    pub syllabus: Vec<Topic>,
    /// 当前话题在 syllabus 中的下标
    pub syllabus_index: usize,
    pub question: Option<Question>,
    pub attempt_count: u32,
    pub history: Vec<HistoryEntry>,
    pub metrics: SessionMetrics,
}

/// get_snapshot 返回的只读公开视图
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub learner_id: String,
    pub psm_state: PsmState,
    pub topic: Option<Topic>,
    pub question: Option<Question>,
    /// 最近 N 条历史
    pub history_tail: Vec<HistoryEntry>,
    pub metrics: SessionMetrics,
    pub pending_tools: usize,
}
