//! 出站消息信封
//!
//! 会话向当前绑定的传输端点发出的消息形态；发送是 fire-and-forget，
//! 端点断开时丢弃不报错。

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::psm::PsmState;

/// 出站端点：传输层协作方持有接收端
pub type TransportSink = mpsc::UnboundedSender<OutboundMessage>;

/// 出站载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundPayload {
    /// 导师话语，直接渲染
    SystemMessage { content: String },
    /// PSM 状态变化（UI 联动用）
    StateChange { state: PsmState },
    /// 用户可见的降级通知
    Error { reason: String },
}

/// 带元信息的完整出站消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// 消息 ID
    pub id: String,
    /// 会话 ID
    pub session_id: String,
    /// 载荷
    pub payload: OutboundPayload,
    /// 时间戳（毫秒）
    pub timestamp: u64,
}

impl OutboundMessage {
    pub fn new(session_id: impl Into<String>, payload: OutboundPayload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_serialization() {
        let msg = OutboundMessage::new(
            "session_alice",
            OutboundPayload::StateChange {
                state: PsmState::AwaitingAnswer,
            },
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"]["type"], "state_change");
        assert_eq!(json["payload"]["state"], "awaiting_answer");
    }
}
