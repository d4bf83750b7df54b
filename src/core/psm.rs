//! 教学状态机（PSM）
//!
//! 纯函数、确定性、无副作用：`transition(state, event)` 只依赖参数本身。
//! 每个状态附带元数据：可接受事件、是否接受用户输入、是否需要异步工具、
//! 入口动作与流型标签。`EvaluatingAnswer` / `AwaitingToolResult` 是锁态：
//! 不把新的用户消息当作新作答，避免同一道题并行评估。

use serde::{Deserialize, Serialize};

use crate::core::error::CoreError;

/// PSM 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsmState {
    /// 初始态，等待内部 initialized 事件
    Initializing,
    /// 讲解阶段，接受用户输入
    Exposition,
    /// 选题中（入口动作调度 generate_question）
    SettingQuestion,
    /// 等待学习者作答
    AwaitingAnswer,
    /// 作答评估中（锁态）
    EvaluatingAnswer,
    /// 答对后的反馈
    ProvidingFeedbackCorrect,
    /// 已知错误补救
    RemediatingKnownError,
    /// 未知错误补救
    RemediatingUnknownError,
    /// 引导对话
    GuidingStudent,
    /// 等待工具结果（锁态）
    AwaitingToolResult,
    /// 终态
    SessionComplete,
}

/// PSM 事件（触发器）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsmEvent {
    Initialized,
    InstructionComplete,
    QuestionPresented,
    AnswerReceived,
    AnswerCorrect,
    KnownErrorDetected,
    UnknownErrorDetected,
    GuidanceComplete,
    RetryQuestion,
    NextTopic,
    SyllabusComplete,
    ToolRequested,
    ToolCompleted,
}

/// 状态入口动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    /// 调度 generate_question
    SelectQuestion,
    /// 调度 check_answer
    EvaluateAnswer,
    /// 调度 create_remediation
    CreateRemediation,
    /// 发出苏格拉底式引导语
    EmitSocraticPrompt,
}

/// 流型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPattern {
    PrimaryLearning,
    Remediation,
    Guidance,
    Terminal,
}

/// 全部状态（测试与 valid_events 用）
pub const ALL_STATES: [PsmState; 11] = [
    PsmState::Initializing,
    PsmState::Exposition,
    PsmState::SettingQuestion,
    PsmState::AwaitingAnswer,
    PsmState::EvaluatingAnswer,
    PsmState::ProvidingFeedbackCorrect,
    PsmState::RemediatingKnownError,
    PsmState::RemediatingUnknownError,
    PsmState::GuidingStudent,
    PsmState::AwaitingToolResult,
    PsmState::SessionComplete,
];

/// 全部事件
pub const ALL_EVENTS: [PsmEvent; 13] = [
    PsmEvent::Initialized,
    PsmEvent::InstructionComplete,
    PsmEvent::QuestionPresented,
    PsmEvent::AnswerReceived,
    PsmEvent::AnswerCorrect,
    PsmEvent::KnownErrorDetected,
    PsmEvent::UnknownErrorDetected,
    PsmEvent::GuidanceComplete,
    PsmEvent::RetryQuestion,
    PsmEvent::NextTopic,
    PsmEvent::SyllabusComplete,
    PsmEvent::ToolRequested,
    PsmEvent::ToolCompleted,
];

/// 初始状态
pub fn initial() -> PsmState {
    PsmState::Initializing
}

/// 状态转移：完整表之外的任何 (state, event) 组合都是 InvalidTransition
pub fn transition(state: PsmState, event: PsmEvent) -> Result<PsmState, CoreError> {
    use PsmEvent as E;
    use PsmState as S;

    let next = match (state, event) {
        (S::Initializing, E::Initialized) => S::Exposition,
        (S::Exposition, E::InstructionComplete) => S::SettingQuestion,
        (S::Exposition, E::ToolRequested) => S::AwaitingToolResult,
        (S::SettingQuestion, E::QuestionPresented) => S::AwaitingAnswer,
        (S::SettingQuestion, E::ToolRequested) => S::AwaitingToolResult,
        (S::AwaitingAnswer, E::AnswerReceived) => S::EvaluatingAnswer,
        (S::EvaluatingAnswer, E::AnswerCorrect) => S::ProvidingFeedbackCorrect,
        (S::EvaluatingAnswer, E::KnownErrorDetected) => S::RemediatingKnownError,
        (S::EvaluatingAnswer, E::UnknownErrorDetected) => S::RemediatingUnknownError,
        (S::ProvidingFeedbackCorrect, E::NextTopic) => S::Exposition,
        (S::ProvidingFeedbackCorrect, E::SyllabusComplete) => S::SessionComplete,
        (S::RemediatingKnownError, E::RetryQuestion) => S::AwaitingAnswer,
        (S::RemediatingUnknownError, E::GuidanceComplete) => S::GuidingStudent,
        (S::GuidingStudent, E::RetryQuestion) => S::AwaitingAnswer,
        (S::AwaitingToolResult, E::ToolCompleted) => S::Exposition,
        (S::AwaitingToolResult, E::QuestionPresented) => S::AwaitingAnswer,
        (S::AwaitingToolResult, E::InstructionComplete) => S::SettingQuestion,
        _ => return Err(CoreError::InvalidTransition { from: state, event }),
    };
    Ok(next)
}

/// 某状态下可接受的事件集合
pub fn valid_events(state: PsmState) -> Vec<PsmEvent> {
    ALL_EVENTS
        .into_iter()
        .filter(|e| transition(state, *e).is_ok())
        .collect()
}

/// 状态入口动作；None 表示无
pub fn entry_action(state: PsmState) -> Option<EntryAction> {
    match state {
        PsmState::SettingQuestion => Some(EntryAction::SelectQuestion),
        PsmState::EvaluatingAnswer => Some(EntryAction::EvaluateAnswer),
        PsmState::RemediatingKnownError => Some(EntryAction::CreateRemediation),
        PsmState::RemediatingUnknownError => Some(EntryAction::EmitSocraticPrompt),
        _ => None,
    }
}

/// 该状态是否把用户消息当作推进事件
pub fn accepts_user_input(state: PsmState) -> bool {
    matches!(
        state,
        PsmState::AwaitingAnswer | PsmState::GuidingStudent | PsmState::Exposition
    )
}

/// 该状态是否伴随异步工具执行
pub fn requires_tool(state: PsmState) -> bool {
    matches!(
        state,
        PsmState::EvaluatingAnswer
            | PsmState::RemediatingKnownError
            | PsmState::RemediatingUnknownError
            | PsmState::AwaitingToolResult
    )
}

/// 是否终态
pub fn is_terminal(state: PsmState) -> bool {
    matches!(state, PsmState::SessionComplete)
}

/// 流型标签
pub fn flow(state: PsmState) -> FlowPattern {
    match state {
        PsmState::RemediatingKnownError | PsmState::RemediatingUnknownError => {
            FlowPattern::Remediation
        }
        PsmState::GuidingStudent => FlowPattern::Guidance,
        PsmState::SessionComplete => FlowPattern::Terminal,
        _ => FlowPattern::PrimaryLearning,
    }
}

impl PsmState {
    /// 稳定的 snake_case 标签（出站 StateChange 与日志用）
    pub fn label(&self) -> &'static str {
        match self {
            PsmState::Initializing => "initializing",
            PsmState::Exposition => "exposition",
            PsmState::SettingQuestion => "setting_question",
            PsmState::AwaitingAnswer => "awaiting_answer",
            PsmState::EvaluatingAnswer => "evaluating_answer",
            PsmState::ProvidingFeedbackCorrect => "providing_feedback_correct",
            PsmState::RemediatingKnownError => "remediating_known_error",
            PsmState::RemediatingUnknownError => "remediating_unknown_error",
            PsmState::GuidingStudent => "guiding_student",
            PsmState::AwaitingToolResult => "awaiting_tool_result",
            PsmState::SessionComplete => "session_complete",
        }
    }
}

impl std::fmt::Display for PsmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::fmt::Display for PsmEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PsmEvent::Initialized => "initialized",
            PsmEvent::InstructionComplete => "instruction_complete",
            PsmEvent::QuestionPresented => "question_presented",
            PsmEvent::AnswerReceived => "answer_received",
            PsmEvent::AnswerCorrect => "answer_correct",
            PsmEvent::KnownErrorDetected => "known_error_detected",
            PsmEvent::UnknownErrorDetected => "unknown_error_detected",
            PsmEvent::GuidanceComplete => "guidance_complete",
            PsmEvent::RetryQuestion => "retry_question",
            PsmEvent::NextTopic => "next_topic",
            PsmEvent::SyllabusComplete => "syllabus_complete",
            PsmEvent::ToolRequested => "tool_requested",
            PsmEvent::ToolCompleted => "tool_completed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_initial_state() {
        assert_eq!(initial(), PsmState::Initializing);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = initial();
        for (event, expected) in [
            (PsmEvent::Initialized, PsmState::Exposition),
            (PsmEvent::InstructionComplete, PsmState::SettingQuestion),
            (PsmEvent::QuestionPresented, PsmState::AwaitingAnswer),
            (PsmEvent::AnswerReceived, PsmState::EvaluatingAnswer),
            (PsmEvent::AnswerCorrect, PsmState::ProvidingFeedbackCorrect),
            (PsmEvent::SyllabusComplete, PsmState::SessionComplete),
        ] {
            s = transition(s, event).unwrap();
            assert_eq!(s, expected);
        }
    }

    #[test]
    fn test_invalid_pairs_rejected() {
        for state in ALL_STATES {
            let valid: HashSet<PsmEvent> = valid_events(state).into_iter().collect();
            for event in ALL_EVENTS {
                let result = transition(state, event);
                if valid.contains(&event) {
                    assert!(result.is_ok());
                } else {
                    assert!(
                        matches!(result, Err(CoreError::InvalidTransition { .. })),
                        "{state} on {event} should be invalid"
                    );
                }
            }
        }
    }

    #[test]
    fn test_all_targets_reachable_states() {
        // 表中每个后继状态都在状态全集里，且除 Initializing 外都可达
        let mut reachable: HashSet<PsmState> = HashSet::from([initial()]);
        // 不动点迭代
        loop {
            let mut grew = false;
            for state in ALL_STATES {
                if !reachable.contains(&state) {
                    continue;
                }
                for event in valid_events(state) {
                    let next = transition(state, event).unwrap();
                    if reachable.insert(next) {
                        grew = true;
                    }
                }
            }
            if !grew {
                break;
            }
        }
        for state in ALL_STATES {
            assert!(reachable.contains(&state), "{state} unreachable");
        }
    }

    #[test]
    fn test_terminal_has_no_events() {
        for state in ALL_STATES {
            if is_terminal(state) {
                assert!(valid_events(state).is_empty());
            }
        }
    }

    #[test]
    fn test_lock_states_reject_answer_events() {
        // 锁态下不存在把用户消息当作新作答的转移
        for state in [PsmState::EvaluatingAnswer, PsmState::AwaitingToolResult] {
            assert!(!accepts_user_input(state));
            assert!(transition(state, PsmEvent::AnswerReceived).is_err());
        }
    }

    #[test]
    fn test_metadata() {
        assert!(accepts_user_input(PsmState::Exposition));
        assert!(accepts_user_input(PsmState::AwaitingAnswer));
        assert!(accepts_user_input(PsmState::GuidingStudent));
        assert!(!accepts_user_input(PsmState::SettingQuestion));

        assert!(requires_tool(PsmState::EvaluatingAnswer));
        assert!(requires_tool(PsmState::AwaitingToolResult));
        assert!(!requires_tool(PsmState::Exposition));

        assert_eq!(entry_action(PsmState::SettingQuestion), Some(EntryAction::SelectQuestion));
        assert_eq!(entry_action(PsmState::Exposition), None);

        assert_eq!(flow(PsmState::GuidingStudent), FlowPattern::Guidance);
        assert_eq!(flow(PsmState::RemediatingKnownError), FlowPattern::Remediation);
        assert_eq!(flow(PsmState::SessionComplete), FlowPattern::Terminal);
        assert_eq!(flow(PsmState::Exposition), FlowPattern::PrimaryLearning);
    }
}
