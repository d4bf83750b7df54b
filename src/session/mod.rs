//! 会话层：每学习者一个有状态 Actor
//!
//! 会话拥有对话历史、当前话题与题目、PSM 当前状态和在途工具调用表；
//! 消费用户消息与工具结果，推进 PSM，向出站端点发出消息。

pub mod actor;
pub mod event;
pub mod handle;
pub mod intent;
pub mod state;

pub use actor::{SessionActor, SessionInit};
pub use event::SessionEvent;
pub use handle::{Delivery, SessionHandle};
pub use intent::{fast_match, signals_understanding, LearnerIntent};
pub use state::{
    CallIntent, HistoryEntry, PendingCall, Question, Role, SessionMetrics, SessionSnapshot,
    SessionView, Topic,
};
