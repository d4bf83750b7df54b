//! 核心错误类型
//!
//! 错误的恢复策略在会话内就地决定：工具类错误走确定性回退，
//! InvalidTransition 仅记录日志并保持状态不变，只有未捕获的 panic 会终结会话任务。

use thiserror::Error;

use crate::core::psm::{PsmEvent, PsmState};

/// 会话核心运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum CoreError {
    /// PSM 拒绝了事件；调用方保持状态不变
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: PsmState, event: PsmEvent },

    #[error("Tool execution failed: {0}")]
    ToolFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 执行器并发与排队额度已满，提交被同步拒绝
    #[error("Tool executor busy")]
    ExecutorBusy,

    #[error("Tool executor closed")]
    ExecutorClosed,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// 会话已终止，收件箱不再接收
    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}
