//! 会话句柄：注册表与传输层看到的收件箱门面
//!
//! 所有操作立即返回，从不等待 LLM 工作；只有快照读取等待一次 oneshot 回执。

use tokio::sync::{mpsc, oneshot};

use crate::gateway::message::TransportSink;
use crate::session::event::SessionEvent;
use crate::session::state::SessionView;

/// 消息入队结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// 仅在会话已终止时出现
    Rejected(String),
}

/// 会话句柄（可克隆；寻址当前活会话）
#[derive(Debug, Clone)]
pub struct SessionHandle {
    learner_id: String,
    session_id: String,
    inbox: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub(crate) fn new(
        learner_id: String,
        session_id: String,
        inbox: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            learner_id,
            session_id,
            inbox,
        }
    }

    pub fn learner_id(&self) -> &str {
        &self.learner_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// 会话任务是否仍在消费收件箱
    pub fn is_alive(&self) -> bool {
        !self.inbox.is_closed()
    }

    /// 入队一条学习者消息；立即返回
    pub fn handle_user_message(&self, content: impl Into<String>) -> Delivery {
        let event = SessionEvent::UserMessage {
            content: content.into(),
        };
        match self.inbox.send(event) {
            Ok(()) => Delivery::Accepted,
            Err(_) => Delivery::Rejected(format!("session {} terminated", self.session_id)),
        }
    }

    /// 只读快照；会话已终止时返回 None
    pub async fn snapshot(&self) -> Option<SessionView> {
        let (reply, rx) = oneshot::channel();
        self.inbox.send(SessionEvent::Snapshot { reply }).ok()?;
        rx.await.ok()
    }

    /// 入队关闭命令
    pub fn request_shutdown(&self, graceful: bool) {
        let _ = self.inbox.send(SessionEvent::Shutdown { graceful });
    }

    /// 绑定/更新出站端点
    pub fn bind_sink(&self, sink: TransportSink) {
        let _ = self.inbox.send(SessionEvent::BindSink(sink));
    }

    /// 解绑出站端点
    pub fn unbind_sink(&self) {
        let _ = self.inbox.send(SessionEvent::UnbindSink);
    }
}
