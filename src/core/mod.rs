//! 核心层：教学状态机、诊断分类、会话监管与注册表、错误类型
//!
//! PSM 与诊断函数保持纯函数（无 I/O、无日志）；所有可观测副作用都在 session 层。

pub mod diagnosis;
pub mod error;
pub mod psm;
pub mod supervisor;

pub use diagnosis::{classify_diagnosis, intervention_level, next_intervention_level};
pub use diagnosis::{DiagnosisClass, InterventionLevel};
pub use error::CoreError;
pub use psm::{EntryAction, FlowPattern, PsmEvent, PsmState};
pub use supervisor::{SessionSupervisor, StartOutcome};
